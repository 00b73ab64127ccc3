//! Streaming segment writer
//!
//! Consumes raw event payloads page by page, deduplicates on the
//! provider's sequence identity, and flushes fixed-size batches as part
//! files. Bounded memory: at most one flush batch of events is held at a
//! time, plus the dedupe key set.

use crate::storage::error::StorageResult;
use crate::storage::part;
use crate::storage::types::Event;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Writer configuration
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Rows per part file flush
    pub flush_rows: usize,
    /// Drop events whose sequence identity was already written
    pub dedupe_events: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_rows: 50_000,
            dedupe_events: true,
        }
    }
}

/// Counters accumulated over one write pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StreamStats {
    pub dedupe_enabled: bool,
    /// Events decoded from pages before deduplication
    pub raw_events_seen: u64,
    /// Events dropped because their key was already seen
    pub duplicates_dropped: u64,
    /// Min event timestamp across written rows, if any carried one
    pub observed_min_ts_ms: Option<i64>,
    /// Max event timestamp across written rows, if any carried one
    pub observed_max_ts_ms: Option<i64>,
    /// Total bytes across written part files
    pub total_bytes_written: u64,
    /// Smallest single part file, if any were written
    pub part_bytes_min: Option<u64>,
    /// Largest single part file, if any were written
    pub part_bytes_max: Option<u64>,
}

/// Result of writing one segment's worth of pages
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Segment directory, None when zero rows survived
    pub segment_dir: Option<PathBuf>,
    /// Rows written across all parts
    pub rows_written: u64,
    /// Number of part files produced
    pub parts_written: u32,
    pub stats: StreamStats,
}

/// Writes pages of events into a segment directory as part files
#[derive(Debug, Clone)]
pub struct SegmentWriter {
    config: WriterConfig,
}

impl SegmentWriter {
    pub fn new(config: WriterConfig) -> Self {
        Self { config }
    }

    /// Write all events from `pages` into `segment_dir`.
    ///
    /// Pages hold the raw `events` payload of each API response; decoding
    /// failures yield zero events from that page rather than an error.
    /// The segment directory is only created when at least one row
    /// survives decoding and deduplication.
    pub fn write_pages(
        &self,
        segment_dir: &Path,
        log_id: &str,
        pages: &[Value],
    ) -> StorageResult<WriteOutcome> {
        let mut stats = StreamStats {
            dedupe_enabled: self.config.dedupe_events,
            ..StreamStats::default()
        };
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut batch: Vec<Event> = Vec::with_capacity(self.config.flush_rows);
        let mut rows_written: u64 = 0;
        let mut parts_written: u32 = 0;

        for (page_idx, payload) in pages.iter().enumerate() {
            let events = match decode_events(payload) {
                Some(events) => events,
                None => {
                    warn!(
                        log_id = %log_id,
                        page = page_idx,
                        "events_payload_undecodable"
                    );
                    Vec::new()
                }
            };

            for event in events {
                stats.raw_events_seen += 1;

                // Observed extent covers every decoded event, including
                // ones the dedup check drops
                if let Some(ts) = event.timestamp_ms() {
                    stats.observed_min_ts_ms =
                        Some(stats.observed_min_ts_ms.map_or(ts, |v| v.min(ts)));
                    stats.observed_max_ts_ms =
                        Some(stats.observed_max_ts_ms.map_or(ts, |v| v.max(ts)));
                }

                if self.config.dedupe_events {
                    if let Some(key) = event.dedupe_key() {
                        if !seen_keys.insert(key) {
                            stats.duplicates_dropped += 1;
                            continue;
                        }
                    }
                    // Events without a sequence identity are always kept
                }

                batch.push(event);
                if batch.len() >= self.config.flush_rows {
                    self.flush(segment_dir, log_id, parts_written, &batch, &mut stats)?;
                    rows_written += batch.len() as u64;
                    parts_written += 1;
                    batch.clear();
                }
            }
        }

        if !batch.is_empty() {
            self.flush(segment_dir, log_id, parts_written, &batch, &mut stats)?;
            rows_written += batch.len() as u64;
            parts_written += 1;
        }

        if self.config.dedupe_events {
            info!(
                log_id = %log_id,
                raw_events_seen = stats.raw_events_seen,
                duplicates_dropped = stats.duplicates_dropped,
                "dedupe_summary"
            );
        }

        let segment_dir = if rows_written > 0 {
            Some(segment_dir.to_path_buf())
        } else {
            None
        };

        Ok(WriteOutcome {
            segment_dir,
            rows_written,
            parts_written,
            stats,
        })
    }

    fn flush(
        &self,
        segment_dir: &Path,
        log_id: &str,
        part_idx: u32,
        batch: &[Event],
        stats: &mut StreamStats,
    ) -> StorageResult<()> {
        debug!(
            log_id = %log_id,
            segment_dir = %segment_dir.display(),
            part_index = part_idx,
            rows = batch.len(),
            "flush_start"
        );

        let (path, bytes) = part::write_part(segment_dir, part_idx, batch)?;

        stats.total_bytes_written += bytes;
        stats.part_bytes_min = Some(stats.part_bytes_min.map_or(bytes, |v| v.min(bytes)));
        stats.part_bytes_max = Some(stats.part_bytes_max.map_or(bytes, |v| v.max(bytes)));

        info!(
            log_id = %log_id,
            path = %path.display(),
            part_index = part_idx,
            rows = batch.len(),
            bytes = bytes,
            "flush_complete"
        );
        Ok(())
    }
}

/// Decode the `events` payload of one API response page.
///
/// The provider is loose about shapes; four are accepted:
/// - a list of event objects
/// - a list of strings, each a JSON-encoded event object
/// - a JSON string encoding a list of event objects
/// - a JSON string encoding `{"events": [...]}`
///
/// An absent payload (null) means zero events. Anything else decodes to
/// `None` (treated as zero events upstream, with a warning).
pub fn decode_events(payload: &Value) -> Option<Vec<Event>> {
    match payload {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => {
            let mut events = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(_) => {
                        events.push(serde_json::from_value(item.clone()).ok()?);
                    }
                    Value::String(s) => {
                        let inner: Value = serde_json::from_str(s).ok()?;
                        if !inner.is_object() {
                            return None;
                        }
                        events.push(serde_json::from_value(inner).ok()?);
                    }
                    _ => return None,
                }
            }
            Some(events)
        }
        Value::String(s) => {
            let inner: Value = serde_json::from_str(s).ok()?;
            match &inner {
                Value::Array(_) => decode_events(&inner),
                Value::Object(map) => decode_events(map.get("events")?),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn writer(flush_rows: usize, dedupe: bool) -> SegmentWriter {
        SegmentWriter::new(WriterConfig {
            flush_rows,
            dedupe_events: dedupe,
        })
    }

    fn page(events: Vec<Value>) -> Value {
        Value::Array(events)
    }

    fn ev(seq: i64, ts: i64) -> Value {
        json!({
            "log_id": "log-a",
            "sequence_number": seq,
            "timestamp": ts,
            "message": format!("event-{}", seq)
        })
    }

    #[test]
    fn test_decode_list_of_objects() {
        let payload = json!([{"message": "a"}, {"message": "b"}]);
        let events = decode_events(&payload).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message.as_deref(), Some("a"));
    }

    #[test]
    fn test_decode_list_of_json_strings() {
        let payload = json!([r#"{"message": "a", "timestamp": 5}"#]);
        let events = decode_events(&payload).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp_ms(), Some(5));
    }

    #[test]
    fn test_decode_json_string_of_list() {
        let payload = json!(r#"[{"message": "a"}]"#);
        let events = decode_events(&payload).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_decode_json_string_of_wrapper_object() {
        let payload = json!(r#"{"events": [{"message": "a"}, {"message": "b"}]}"#);
        let events = decode_events(&payload).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_decode_null_is_zero_events() {
        assert_eq!(decode_events(&Value::Null), Some(Vec::new()));
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert!(decode_events(&json!(42)).is_none());
        assert!(decode_events(&json!("not json at all")).is_none());
        assert!(decode_events(&json!([1, 2, 3])).is_none());
        assert!(decode_events(&json!({"events": []})).is_none());
    }

    #[test]
    fn test_flush_splits_into_parts() {
        let dir = tempdir().unwrap();
        let w = writer(3, false);
        let events: Vec<Value> = (0..7).map(|i| ev(i, 1000 + i)).collect();

        let outcome = w.write_pages(dir.path(), "log-a", &[page(events)]).unwrap();
        assert_eq!(outcome.rows_written, 7);
        assert_eq!(outcome.parts_written, 3);
        assert_eq!(outcome.segment_dir.as_deref(), Some(dir.path()));

        let parts = part::list_parts(dir.path()).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(part::read_header(&parts[0]).unwrap().row_count, 3);
        assert_eq!(part::read_header(&parts[2]).unwrap().row_count, 1);
    }

    #[test]
    fn test_dedupe_drops_repeated_sequence() {
        let dir = tempdir().unwrap();
        let w = writer(100, true);
        let pages = vec![
            page(vec![ev(1, 1000), ev(2, 2000)]),
            page(vec![ev(2, 2000), ev(3, 3000)]),
        ];

        let outcome = w.write_pages(dir.path(), "log-a", &pages).unwrap();
        assert_eq!(outcome.rows_written, 3);
        assert_eq!(outcome.stats.raw_events_seen, 4);
        assert_eq!(outcome.stats.duplicates_dropped, 1);
    }

    #[test]
    fn test_dedupe_prefers_string_sequence() {
        let dir = tempdir().unwrap();
        let w = writer(100, true);
        // Same numeric sequence but distinct string sequence: both kept
        let a = json!({"log_id": "l", "sequence_number": 1, "sequence_number_str": "1-a"});
        let b = json!({"log_id": "l", "sequence_number": 1, "sequence_number_str": "1-b"});

        let outcome = w.write_pages(dir.path(), "l", &[page(vec![a, b])]).unwrap();
        assert_eq!(outcome.rows_written, 2);
        assert_eq!(outcome.stats.duplicates_dropped, 0);
    }

    #[test]
    fn test_keyless_events_never_dropped() {
        let dir = tempdir().unwrap();
        let w = writer(100, true);
        let keyless = json!({"message": "same"});
        let pages = vec![page(vec![keyless.clone(), keyless.clone(), keyless])];

        let outcome = w.write_pages(dir.path(), "log-a", &pages).unwrap();
        assert_eq!(outcome.rows_written, 3);
        assert_eq!(outcome.stats.duplicates_dropped, 0);
    }

    #[test]
    fn test_dedupe_disabled_keeps_everything() {
        let dir = tempdir().unwrap();
        let w = writer(100, false);
        let pages = vec![page(vec![ev(1, 1000), ev(1, 1000)])];

        let outcome = w.write_pages(dir.path(), "log-a", &pages).unwrap();
        assert_eq!(outcome.rows_written, 2);
        assert!(!outcome.stats.dedupe_enabled);
    }

    #[test]
    fn test_zero_rows_creates_nothing() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("empty-segment");
        let w = writer(100, true);

        let outcome = w
            .write_pages(&target, "log-a", &[page(vec![]), json!(42)])
            .unwrap();
        assert_eq!(outcome.rows_written, 0);
        assert_eq!(outcome.parts_written, 0);
        assert!(outcome.segment_dir.is_none());
        assert!(!target.exists());
    }

    #[test]
    fn test_timestamp_bounds_include_dropped_duplicates() {
        let dir = tempdir().unwrap();
        let w = writer(100, true);
        // Same dedup key; the dropped copy carries the earlier timestamp
        let first = json!({"log_id": "l", "sequence_number": 1, "timestamp": 5000});
        let dup = json!({"log_id": "l", "sequence_number": 1, "timestamp": 100});

        let outcome = w
            .write_pages(dir.path(), "l", &[page(vec![first, dup])])
            .unwrap();
        assert_eq!(outcome.rows_written, 1);
        assert_eq!(outcome.stats.duplicates_dropped, 1);
        assert_eq!(outcome.stats.observed_min_ts_ms, Some(100));
        assert_eq!(outcome.stats.observed_max_ts_ms, Some(5000));
    }

    #[test]
    fn test_stats_track_timestamp_bounds_and_bytes() {
        let dir = tempdir().unwrap();
        let w = writer(2, false);
        let pages = vec![page(vec![ev(1, 5000), ev(2, 1000), ev(3, 9000)])];

        let outcome = w.write_pages(dir.path(), "log-a", &pages).unwrap();
        assert_eq!(outcome.stats.observed_min_ts_ms, Some(1000));
        assert_eq!(outcome.stats.observed_max_ts_ms, Some(9000));
        assert!(outcome.stats.total_bytes_written > 0);
        assert!(outcome.stats.part_bytes_min.unwrap() <= outcome.stats.part_bytes_max.unwrap());
    }
}
