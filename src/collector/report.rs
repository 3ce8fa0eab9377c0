//! Finalized latency summary

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Marker rendered for a required sample that never arrived
pub const NO_DATA: &str = "no data available";

/// Unit appended to every rendered sample
pub const UNIT: &str = "ms";

/// Snapshot taken when a debug session finalizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyReport {
    /// Required names in start order, with their value if one arrived
    entries: Vec<(String, Option<i64>)>,
    timed_out: bool,
}

impl LatencyReport {
    pub(crate) fn from_samples(required: &[String], samples: &HashMap<String, i64>) -> Self {
        let entries: Vec<(String, Option<i64>)> = required
            .iter()
            .map(|name| (name.clone(), samples.get(name).copied()))
            .collect();
        let timed_out = entries.iter().any(|(_, v)| v.is_none());
        Self { entries, timed_out }
    }

    /// True when the deadline fired before every sample arrived
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Raw value of a required sample (`None` if unset or not required)
    pub fn value(&self, name: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| *v)
    }

    /// `"<value>ms"` or the no-data marker
    pub fn render(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| render_value(*v))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<i64>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// JSON object of rendered entries, restricted to names passing `keep`
    pub fn to_json_filtered(&self, keep: impl Fn(&str) -> bool) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .filter(|(n, _)| keep(n))
            .map(|(n, v)| (n.clone(), Value::String(render_value(*v))))
            .collect();
        Value::Object(map)
    }

    pub fn to_json(&self) -> Value {
        self.to_json_filtered(|_| true)
    }
}

fn render_value(value: Option<i64>) -> String {
    match value {
        Some(v) => format!("{}{}", v, UNIT),
        None => NO_DATA.to_string(),
    }
}

impl std::fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}: {}", name, render_value(*value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(pairs: &[(&str, i64)], required: &[&str]) -> LatencyReport {
        let samples: HashMap<String, i64> =
            pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect();
        let required: Vec<String> = required.iter().map(|s| s.to_string()).collect();
        LatencyReport::from_samples(&required, &samples)
    }

    #[test]
    fn test_render_units_and_marker() {
        let r = report(&[("x", 10)], &["x", "y"]);
        assert_eq!(r.render("x").as_deref(), Some("10ms"));
        assert_eq!(r.render("y").as_deref(), Some(NO_DATA));
        assert_eq!(r.render("z"), None);
        assert_eq!(r.to_string(), "x: 10ms\ny: no data available");
        assert!(r.timed_out());
    }

    #[test]
    fn test_zero_is_data_not_missing() {
        let r = report(&[("x", 0)], &["x"]);
        assert_eq!(r.render("x").as_deref(), Some("0ms"));
        assert_eq!(r.value("x"), Some(0));
        assert!(!r.timed_out());
    }

    #[test]
    fn test_extra_samples_not_reported() {
        let r = report(&[("x", 1), ("extra", 2)], &["x"]);
        assert_eq!(r.entries().count(), 1);
        assert_eq!(r.value("extra"), None);
    }

    #[test]
    fn test_json_filter() {
        let r = report(&[("x", 5), ("anchor", 1_700_000_000_000)], &["anchor", "x"]);
        let json = r.to_json_filtered(|n| n != "anchor");
        assert_eq!(json["x"], "5ms");
        assert!(json.get("anchor").is_none());
        assert_eq!(r.to_json()["anchor"], "1700000000000ms");
    }
}
