//! Core data types for the logcache storage layer
//!
//! This module defines the fundamental types used throughout the pipeline:
//! - `Event`: a single log event as returned by the log-search API
//! - `TimeRange`: a half-open time interval in epoch milliseconds

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A single log event from the log-search API.
///
/// The provider guarantees very little about event shape: `timestamp`,
/// `message`, `log_id` and the sequence-number fields are decoded when
/// present, everything else is carried through untouched in `extra` so
/// that part files preserve the full payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event timestamp in epoch milliseconds (provider may send a float)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Number>,

    /// Raw log line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Log identifier the event belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<String>,

    /// Provider sequence number (numeric form)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<Number>,

    /// Provider sequence number (string form, preferred for dedup because
    /// the numeric form can exceed 53-bit JSON integer precision)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number_str: Option<String>,

    /// All other provider fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Event timestamp as epoch milliseconds, if present and numeric.
    pub fn timestamp_ms(&self) -> Option<i64> {
        let ts = self.timestamp.as_ref()?;
        ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64))
    }

    /// Stable dedup key for this event: `{log_id}:{sequence_number}`.
    ///
    /// Prefers the string form of the sequence number. Returns `None` when
    /// either component is absent; such events are never deduplicated
    /// (completeness is favored over strict dedup).
    pub fn dedupe_key(&self) -> Option<String> {
        let log_id = self.log_id.as_deref()?;
        let seq = match (&self.sequence_number_str, &self.sequence_number) {
            (Some(s), _) => s.clone(),
            (None, Some(n)) => n.to_string(),
            (None, None) => return None,
        };
        Some(format!("{}:{}", log_id, seq))
    }
}

/// Time range for cache planning (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in epoch milliseconds
    pub start: i64,
    /// End timestamp (exclusive), in epoch milliseconds
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range
    ///
    /// # Panics
    /// Panics if start >= end
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start < end, "TimeRange: start must be less than end");
        Self { start, end }
    }

    /// Create a time range, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if this range overlaps with another (shared boundary instants
    /// do not overlap under half-open semantics)
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Get the duration in milliseconds
    pub fn duration_millis(&self) -> i64 {
        self.end - self.start
    }

    /// Get intersection with another range, if any
    pub fn intersection(&self, other: &TimeRange) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Self::try_new(start, end)
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_from(value: Value) -> Event {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_event_decodes_known_and_extra_fields() {
        let event = event_from(json!({
            "timestamp": 1700000000123i64,
            "message": "GET /health 200",
            "log_id": "log-a",
            "sequence_number": 42,
            "labels": ["prod", "api"],
        }));

        assert_eq!(event.timestamp_ms(), Some(1700000000123));
        assert_eq!(event.message.as_deref(), Some("GET /health 200"));
        assert!(event.extra.contains_key("labels"));
    }

    #[test]
    fn test_event_roundtrip_preserves_extra() {
        let original = json!({
            "timestamp": 1000,
            "message": "m",
            "custom": {"nested": true},
        });
        let event = event_from(original.clone());
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_event_float_timestamp() {
        let event = event_from(json!({"timestamp": 1700000000123.0}));
        assert_eq!(event.timestamp_ms(), Some(1700000000123));
    }

    #[test]
    fn test_dedupe_key_prefers_string_sequence() {
        let event = event_from(json!({
            "log_id": "log-a",
            "sequence_number": 7,
            "sequence_number_str": "70000000000000000001",
        }));
        assert_eq!(
            event.dedupe_key().as_deref(),
            Some("log-a:70000000000000000001")
        );
    }

    #[test]
    fn test_dedupe_key_falls_back_to_numeric_sequence() {
        let event = event_from(json!({"log_id": "log-a", "sequence_number": 7}));
        assert_eq!(event.dedupe_key().as_deref(), Some("log-a:7"));
    }

    #[test]
    fn test_dedupe_key_missing_components() {
        let no_log = event_from(json!({"sequence_number": 7}));
        assert_eq!(no_log.dedupe_key(), None);

        let no_seq = event_from(json!({"log_id": "log-a"}));
        assert_eq!(no_seq.dedupe_key(), None);
    }

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(1000, 2000);

        assert!(!range.contains(999));
        assert!(range.contains(1000));
        assert!(range.contains(1500));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
    }

    #[test]
    fn test_time_range_overlaps() {
        let range1 = TimeRange::new(1000, 2000);
        let range2 = TimeRange::new(1500, 2500);
        let range3 = TimeRange::new(2000, 3000);
        let range4 = TimeRange::new(500, 1500);

        assert!(range1.overlaps(&range2));
        assert!(!range1.overlaps(&range3)); // Adjacent, not overlapping
        assert!(range1.overlaps(&range4));
    }

    #[test]
    fn test_time_range_intersection() {
        let a = TimeRange::new(0, 1000);
        let b = TimeRange::new(500, 1500);
        assert_eq!(a.intersection(&b), Some(TimeRange::new(500, 1000)));

        let c = TimeRange::new(1000, 2000);
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn test_time_range_try_new_rejects_empty() {
        assert_eq!(TimeRange::try_new(5, 5), None);
        assert_eq!(TimeRange::try_new(10, 5), None);
        assert!(TimeRange::try_new(5, 10).is_some());
    }
}
