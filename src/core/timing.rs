//! Latency sample names used by the debug probe
//!
//! Two fields are absolute anchors (the upstream and server timestamps when
//! the probe started); the rest are millisecond latencies derived from them.

/// Named timing sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeField {
    InitialMqttTime,
    InitialServerTime,
    Esp32ToServer,
    Esp32ToUltra96,
    Ultra96ToServer,
    InferenceTime,
    ServerToVis,
    EndToEndGesture,
    EndToEndVoice,
}

impl TimeField {
    /// Every field a full probe waits for
    pub const ALL: [TimeField; 9] = [
        TimeField::InitialMqttTime,
        TimeField::Esp32ToServer,
        TimeField::Esp32ToUltra96,
        TimeField::Ultra96ToServer,
        TimeField::InferenceTime,
        TimeField::InitialServerTime,
        TimeField::ServerToVis,
        TimeField::EndToEndGesture,
        TimeField::EndToEndVoice,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            TimeField::InitialMqttTime => "INITIAL_MQTT_TIME",
            TimeField::InitialServerTime => "INITIAL_SERVER_TIME",
            TimeField::Esp32ToServer => "ESP32_TO_SERVER",
            TimeField::Esp32ToUltra96 => "ESP32_TO_ULTRA96",
            TimeField::Ultra96ToServer => "ULTRA96_TO_SERVER",
            TimeField::InferenceTime => "INFERENCE_TIME",
            TimeField::ServerToVis => "SERVER_TO_VIS",
            TimeField::EndToEndGesture => "END_TO_END_GESTURE",
            TimeField::EndToEndVoice => "END_TO_END_VOICE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// False for the absolute anchors, which are not worth reporting
    pub const fn is_latency(&self) -> bool {
        !matches!(self, TimeField::InitialMqttTime | TimeField::InitialServerTime)
    }

    /// Required-name list for a full probe
    pub fn required_names() -> Vec<String> {
        Self::ALL.iter().map(|f| f.as_str().to_string()).collect()
    }
}

impl std::fmt::Display for TimeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lookup() {
        for field in TimeField::ALL {
            assert_eq!(TimeField::from_name(field.as_str()), Some(field));
        }
        assert_eq!(TimeField::from_name("nope"), None);
    }

    #[test]
    fn test_anchor_fields_not_latency() {
        assert!(!TimeField::InitialMqttTime.is_latency());
        assert!(!TimeField::InitialServerTime.is_latency());
        assert!(TimeField::ServerToVis.is_latency());
        assert_eq!(TimeField::required_names().len(), 9);
    }
}
