//! Upstream payload shapes and the shared JSON decoder
//!
//! Payloads arrive as owned byte buffers, so decoding goes through simd-json
//! in place.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Payload decoding failure
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,
    #[error("Invalid JSON: {0}")]
    Json(#[from] simd_json::Error),
}

/// Decode a JSON payload, parsing in place
pub fn decode<T: DeserializeOwned>(mut payload: Vec<u8>) -> Result<T, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(simd_json::serde::from_slice(&mut payload)?)
}

/// `esp32/command`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<Vec<f64>>,
}

/// Recognised voice command
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VoiceInfo {
    pub command: String,
    pub result: String,
}

impl VoiceInfo {
    /// Results that adjust a setting rather than act on an object
    pub fn is_setting(&self) -> bool {
        matches!(self.result.as_str(), "ODM" | "UP" | "DOWN")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FailedInfo {
    pub error: String,
}

/// Timing block reported by the inference board during a probe
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub ultra96_receive_time: i64,
    pub ultra96_send_time: i64,
    #[serde(default)]
    pub inference_time: Option<i64>,
}

/// `ultra96/voice_result`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceResult {
    Success { info: VoiceInfo },
    Failed {
        #[serde(default)]
        error: Option<FailedInfo>,
    },
    VoiceDebug(DebugInfo),
}

/// `debug/start`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DebugStart {
    /// Upstream send time, Unix milliseconds
    pub timestamp: i64,
}
