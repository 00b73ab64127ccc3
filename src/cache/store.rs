//! Segment directory layout and discovery
//!
//! Cached segments live under `{cache_root}/{log_id}/from={start}/to={end}/`
//! with millisecond epoch bounds encoded in the path. Discovery is a
//! tolerant scan: directories that do not parse as a valid half-open
//! window are skipped, never fatal.

use crate::storage::error::StorageResult;
use crate::storage::part::PART_EXTENSION;
use crate::storage::types::TimeRange;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One cached segment discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSegment {
    pub log_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    /// Segment directory containing the part files
    pub path: PathBuf,
}

impl CacheSegment {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_ms, self.end_ms)
    }

    pub fn overlaps_window(&self, window: &TimeRange) -> bool {
        self.range().overlaps(window)
    }
}

/// Segment directory for a log and window:
/// `{root}/{log_id}/from={start_ms}/to={end_ms}`
pub fn segment_dir(root: &Path, log_id: &str, start_ms: i64, end_ms: i64) -> PathBuf {
    root.join(log_id)
        .join(format!("from={}", start_ms))
        .join(format!("to={}", end_ms))
}

fn parse_component(name: &str, prefix: &str) -> Option<i64> {
    name.strip_prefix(prefix)?.parse().ok()
}

/// List all cached segments for `log_id`, sorted by (start, end, path).
///
/// Directories whose names do not parse, or whose window is empty or
/// inverted, are skipped. A missing log directory means no segments.
pub fn list_segments(root: &Path, log_id: &str) -> StorageResult<Vec<CacheSegment>> {
    let log_dir = root.join(log_id);
    if !log_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();

    for from_entry in std::fs::read_dir(&log_dir)? {
        let from_path = from_entry?.path();
        if !from_path.is_dir() {
            continue;
        }
        let start_ms = match from_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| parse_component(n, "from="))
        {
            Some(v) => v,
            None => {
                debug!(path = %from_path.display(), "skipping_unparseable_segment_dir");
                continue;
            }
        };

        for to_entry in std::fs::read_dir(&from_path)? {
            let to_path = to_entry?.path();
            if !to_path.is_dir() {
                continue;
            }
            let end_ms = match to_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| parse_component(n, "to="))
            {
                Some(v) => v,
                None => {
                    debug!(path = %to_path.display(), "skipping_unparseable_segment_dir");
                    continue;
                }
            };

            if end_ms <= start_ms {
                debug!(
                    path = %to_path.display(),
                    start_ms,
                    end_ms,
                    "skipping_invalid_segment_window"
                );
                continue;
            }

            segments.push(CacheSegment {
                log_id: log_id.to_string(),
                start_ms,
                end_ms,
                path: to_path,
            });
        }
    }

    segments.sort_by(|a, b| {
        (a.start_ms, a.end_ms, &a.path).cmp(&(b.start_ms, b.end_ms, &b.path))
    });
    Ok(segments)
}

/// Time ranges covered by the given segments (not normalized)
pub fn cached_ranges(segments: &[CacheSegment]) -> Vec<TimeRange> {
    segments.iter().map(|s| s.range()).collect()
}

/// Best-effort disk footprint of the part files directly inside the
/// given segment directories. Returns (total bytes, part count); stat
/// failures and unreadable directories contribute nothing.
pub fn disk_footprint(segment_dirs: &[PathBuf]) -> (u64, u64) {
    let mut total_bytes = 0u64;
    let mut part_count = 0u64;

    for dir in segment_dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.starts_with("part-") || !name.ends_with(&format!(".{}", PART_EXTENSION)) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                total_bytes += meta.len();
                part_count += 1;
            }
        }
    }

    (total_bytes, part_count)
}
