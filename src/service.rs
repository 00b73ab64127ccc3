//! Ingestion orchestrator
//!
//! Ties the cache, the fetch client, and the segment writer together
//! for one run: decide what the cache already covers, read that back,
//! fetch only the gaps, and report a single reconciled result.

use crate::cache::{self, CacheSegment};
use crate::client::{FetchClient, FetchConfig, FetchError, ReqwestTransport, Transport};
use crate::config::Config;
use crate::storage::part;
use crate::storage::{SegmentWriter, StorageError, StreamStats, TimeRange, WriterConfig};
use chrono::DateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors from an ingestion run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Invalid window: end must be after start")]
    InvalidWindow,

    #[error("Client init failed: {0}")]
    ClientInit(String),

    #[error("Cache read failed at {path:?}: {message}")]
    CacheRead { path: PathBuf, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// How the cache answered a requested window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDecisionKind {
    /// Fully covered; no fetching needed
    Hit,
    /// Partly covered; only the gaps get fetched
    Partial,
    /// Nothing usable on disk; the full window gets fetched
    Miss,
}

impl std::fmt::Display for CacheDecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheDecisionKind::Hit => write!(f, "hit"),
            CacheDecisionKind::Partial => write!(f, "partial"),
            CacheDecisionKind::Miss => write!(f, "miss"),
        }
    }
}

/// Cache reconciliation result for one window
#[derive(Debug, Clone, Serialize)]
pub struct CacheDecision {
    pub kind: CacheDecisionKind,
    /// Gaps that still need fetching, sorted and disjoint
    pub missing_ranges: Vec<TimeRange>,
    /// Windows the overlapping cached segments cover
    pub cached_ranges: Vec<TimeRange>,
    /// Segment directories contributing cached coverage
    pub segments_used: Vec<PathBuf>,
}

/// Compare a requested window against the on-disk cache.
///
/// Bypass mode reports a miss for the full window without touching the
/// cache at all.
pub fn compute_cache_decision(
    cache_root: &Path,
    log_id: &str,
    window: &TimeRange,
    bypass: bool,
) -> Result<CacheDecision, RunError> {
    if bypass {
        return Ok(CacheDecision {
            kind: CacheDecisionKind::Miss,
            missing_ranges: vec![*window],
            cached_ranges: Vec::new(),
            segments_used: Vec::new(),
        });
    }

    let overlapping: Vec<CacheSegment> = cache::list_segments(cache_root, log_id)?
        .into_iter()
        .filter(|s| s.overlaps_window(window))
        .collect();

    let cached_ranges = cache::cached_ranges(&overlapping);
    let missing_ranges = cache::missing_subranges(window.start, window.end, &cached_ranges)?;

    let kind = if missing_ranges.is_empty() {
        CacheDecisionKind::Hit
    } else if overlapping.is_empty() {
        CacheDecisionKind::Miss
    } else {
        CacheDecisionKind::Partial
    };

    Ok(CacheDecision {
        kind,
        missing_ranges,
        cached_ranges,
        segments_used: overlapping.into_iter().map(|s| s.path).collect(),
    })
}

/// Parse an ISO-8601 timestamp to epoch milliseconds.
///
/// The offset is mandatory; a naive timestamp is rejected rather than
/// silently assumed UTC.
pub fn iso8601_to_epoch_ms(value: &str) -> Result<i64, RunError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| RunError::InvalidTimestamp {
            value: value.to_string(),
            reason: format!("{} (timezone offset is required)", e),
        })
}

/// Outcome of one ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub log_key: String,
    pub start_time: String,
    pub end_time: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub partition_date: Option<String>,
    /// Final segment directories backing this window
    pub output_paths: Vec<PathBuf>,
    pub rows_processed: u64,
    pub batches_processed: u64,
    pub parts_written: u32,
    pub segments_used: u64,
    pub cache_hit: bool,
    pub cache_partial: bool,
    pub cache_decision: CacheDecisionKind,
    pub dedupe_enabled: bool,
    pub raw_events_seen: u64,
    pub duplicates_dropped: u64,
    pub observed_min_ts_ms: Option<i64>,
    pub observed_max_ts_ms: Option<i64>,
    pub total_bytes: u64,
    pub part_bytes_min: Option<u64>,
    pub part_bytes_max: Option<u64>,
    pub duration_seconds: f64,
}

/// Row and timestamp totals read back from segment metadata
#[derive(Debug, Default)]
struct SegmentTotals {
    rows: u64,
    min_ts: Option<i64>,
    max_ts: Option<i64>,
    paths: Vec<PathBuf>,
}

/// Orchestrates one log's fetch-and-cache pipeline
pub struct IngestionService<T: Transport> {
    config: Config,
    client: FetchClient<T>,
    writer: SegmentWriter,
}

impl IngestionService<ReqwestTransport> {
    pub fn new(config: Config) -> Result<Self, RunError> {
        let transport = ReqwestTransport::new(
            &config.api.api_key,
            Duration::from_secs(config.api.request_timeout_secs),
        )
        .map_err(|e| RunError::ClientInit(e.to_string()))?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> IngestionService<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        let client = FetchClient::new(transport, fetch_config(&config));
        let writer = SegmentWriter::new(WriterConfig {
            flush_rows: config.cache.flush_rows,
            dedupe_events: config.cache.dedupe_events,
        });
        Self {
            config,
            client,
            writer,
        }
    }

    /// Run one ingestion for `[start_time, end_time)`.
    ///
    /// Cached coverage is read back before any network traffic so a
    /// corrupt cache fails fast. Only the uncovered gaps are fetched,
    /// each into its own segment directory.
    pub async fn run(
        &self,
        start_time: &str,
        end_time: &str,
        partition_date: Option<&str>,
    ) -> Result<RunResult, RunError> {
        let started = tokio::time::Instant::now();
        let run_id = Uuid::new_v4().to_string();

        let start_ms = iso8601_to_epoch_ms(start_time)?;
        let end_ms = iso8601_to_epoch_ms(end_time)?;
        let window = TimeRange::try_new(start_ms, end_ms).ok_or(RunError::InvalidWindow)?;

        let log_id = self.config.api.log_key.clone();
        let cache_root = PathBuf::from(&self.config.cache.cache_dir);
        let bypass = self.config.cache.bypass_cache;

        let decision =
            compute_cache_decision(&cache_root, &log_id, &window, bypass)?;
        info!(
            run_id = %run_id,
            log_id = %log_id,
            decision = %decision.kind,
            cached_segments = decision.segments_used.len(),
            gaps = decision.missing_ranges.len(),
            "cache_decision"
        );

        // Read cached coverage before any fetching
        let cached = self.summarize_segments(&decision.segments_used, bypass)?;

        let mut result = if decision.missing_ranges.is_empty() {
            self.build_hit_result(&decision, cached)
        } else {
            self.fetch_gaps(&run_id, &log_id, &cache_root, &window, &decision, cached)
                .await?
        };

        result.run_id = run_id.clone();
        result.log_key = log_id;
        result.start_time = start_time.to_string();
        result.end_time = end_time.to_string();
        result.start_time_ms = start_ms;
        result.end_time_ms = end_ms;
        result.partition_date = partition_date.map(str::to_string);
        result.duration_seconds = started.elapsed().as_secs_f64();

        self.log_summary(&result);
        self.write_run_summary(&result);
        Ok(result)
    }

    fn build_hit_result(&self, decision: &CacheDecision, cached: SegmentTotals) -> RunResult {
        let page_size = (self.config.api.page_size as u64).max(1);
        let (total_bytes, _) = cache::disk_footprint(&cached.paths);

        RunResult {
            rows_processed: cached.rows,
            batches_processed: cached.rows.div_ceil(page_size),
            parts_written: 0,
            segments_used: cached.paths.len() as u64,
            cache_hit: true,
            cache_partial: false,
            cache_decision: decision.kind,
            dedupe_enabled: self.config.cache.dedupe_events,
            raw_events_seen: 0,
            duplicates_dropped: 0,
            observed_min_ts_ms: cached.min_ts,
            observed_max_ts_ms: cached.max_ts,
            total_bytes,
            part_bytes_min: None,
            part_bytes_max: None,
            output_paths: cached.paths,
            ..empty_result()
        }
    }

    async fn fetch_gaps(
        &self,
        run_id: &str,
        log_id: &str,
        cache_root: &Path,
        window: &TimeRange,
        decision: &CacheDecision,
        cached: SegmentTotals,
    ) -> Result<RunResult, RunError> {
        let bypass = self.config.cache.bypass_cache;
        // Bypassed fetches must not seed the cache
        let write_root = if bypass {
            PathBuf::from(&self.config.cache.output_dir)
        } else {
            cache_root.to_path_buf()
        };

        let mut stats = StreamStats::default();
        let mut fetched_rows: u64 = 0;
        let mut parts_written: u32 = 0;
        let mut gaps_fetched: u64 = 0;
        let mut nonempty_gaps: u64 = 0;
        let mut fetched_dirs: Vec<PathBuf> = Vec::new();
        let mut fetched_windows: Vec<TimeRange> = Vec::new();

        for gap in &decision.missing_ranges {
            info!(
                run_id = %run_id,
                log_id = %log_id,
                gap = %gap,
                "gap_fetch_start"
            );
            let pages = self.client.fetch_window(gap.start, gap.end).await?;
            let payloads: Vec<serde_json::Value> =
                pages.into_iter().map(|p| p.events).collect();

            let target = cache::segment_dir(&write_root, log_id, gap.start, gap.end);
            let outcome = self.writer.write_pages(&target, log_id, &payloads)?;

            fetched_rows += outcome.rows_written;
            parts_written += outcome.parts_written;
            gaps_fetched += 1;
            if outcome.rows_written > 0 {
                nonempty_gaps += 1;
            }
            merge_stats(&mut stats, &outcome.stats);
            if let Some(dir) = outcome.segment_dir {
                fetched_dirs.push(dir);
            }
            fetched_windows.push(*gap);
        }

        if fetched_rows == 0 {
            // Nothing came back for any gap; report the empty window
            // rather than serving stale partial coverage
            warn!(
                run_id = %run_id,
                log_id = %log_id,
                gaps = gaps_fetched,
                "pipeline_empty"
            );
            return Ok(RunResult {
                cache_partial: decision.kind == CacheDecisionKind::Partial,
                cache_decision: decision.kind,
                dedupe_enabled: self.config.cache.dedupe_events,
                raw_events_seen: stats.raw_events_seen,
                duplicates_dropped: stats.duplicates_dropped,
                ..empty_result()
            });
        }

        // Re-list what is actually on disk for the final accounting
        let output_paths = if bypass {
            fetched_dirs
        } else {
            let overlapping: Vec<CacheSegment> = cache::list_segments(cache_root, log_id)?
                .into_iter()
                .filter(|s| s.overlaps_window(window))
                .collect();
            match decision.kind {
                CacheDecisionKind::Partial => {
                    overlapping.into_iter().map(|s| s.path).collect()
                }
                _ => overlapping
                    .into_iter()
                    .filter(|s| fetched_windows.contains(&s.range()))
                    .map(|s| s.path)
                    .collect(),
            }
        };

        let (total_bytes, _) = cache::disk_footprint(&output_paths);

        Ok(RunResult {
            rows_processed: cached.rows + fetched_rows,
            batches_processed: nonempty_gaps,
            parts_written,
            segments_used: output_paths.len() as u64,
            cache_hit: false,
            cache_partial: decision.kind == CacheDecisionKind::Partial,
            cache_decision: decision.kind,
            dedupe_enabled: self.config.cache.dedupe_events,
            raw_events_seen: stats.raw_events_seen,
            duplicates_dropped: stats.duplicates_dropped,
            observed_min_ts_ms: merge_min(cached.min_ts, stats.observed_min_ts_ms),
            observed_max_ts_ms: merge_max(cached.max_ts, stats.observed_max_ts_ms),
            total_bytes,
            part_bytes_min: stats.part_bytes_min,
            part_bytes_max: stats.part_bytes_max,
            output_paths,
            ..empty_result()
        })
    }

    /// Sum row counts and timestamp bounds from segment part headers.
    ///
    /// With the cache bypassed, unreadable segments are skipped with a
    /// warning; otherwise corruption is fatal.
    fn summarize_segments(
        &self,
        dirs: &[PathBuf],
        tolerate_corruption: bool,
    ) -> Result<SegmentTotals, RunError> {
        let mut totals = SegmentTotals::default();

        for dir in dirs {
            if totals.paths.contains(dir) {
                continue;
            }
            let summary = match part::dataset_summary(dir) {
                Ok(summary) => summary,
                Err(e) if tolerate_corruption => {
                    warn!(path = %dir.display(), error = %e, "skipping_unreadable_segment");
                    continue;
                }
                Err(e) => {
                    return Err(RunError::CacheRead {
                        path: dir.clone(),
                        message: e.to_string(),
                    })
                }
            };
            totals.rows += summary.row_count;
            totals.min_ts = merge_min(totals.min_ts, summary.min_timestamp);
            totals.max_ts = merge_max(totals.max_ts, summary.max_timestamp);
            totals.paths.push(dir.clone());
        }

        Ok(totals)
    }

    fn log_summary(&self, result: &RunResult) {
        let reconciled =
            result.raw_events_seen == result.rows_processed_from_fetch() + result.duplicates_dropped;
        if !reconciled {
            warn!(
                run_id = %result.run_id,
                raw_events_seen = result.raw_events_seen,
                duplicates_dropped = result.duplicates_dropped,
                "reconciliation_mismatch"
            );
        }
        info!(
            run_id = %result.run_id,
            decision = %result.cache_decision,
            rows = result.rows_processed,
            segments = result.segments_used,
            parts_written = result.parts_written,
            duplicates_dropped = result.duplicates_dropped,
            total_bytes = result.total_bytes,
            duration_seconds = result.duration_seconds,
            reconciled,
            "run_summary"
        );
    }

    /// Best-effort run summary JSON under the output directory
    fn write_run_summary(&self, result: &RunResult) {
        let output_dir = PathBuf::from(&self.config.cache.output_dir);
        let path = output_dir.join(format!("run-{}.json", result.run_id));
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&output_dir)?;
            let body = serde_json::to_vec_pretty(result)?;
            std::fs::write(&path, body)
        };
        match write() {
            Ok(()) => info!(path = %path.display(), "run_summary_written"),
            Err(e) => warn!(path = %path.display(), error = %e, "run_summary_write_failed"),
        }
    }
}

impl RunResult {
    /// Rows this run pulled over the network, as opposed to cache reads
    fn rows_processed_from_fetch(&self) -> u64 {
        if self.raw_events_seen >= self.duplicates_dropped {
            self.raw_events_seen - self.duplicates_dropped
        } else {
            0
        }
    }
}

fn fetch_config(config: &Config) -> FetchConfig {
    FetchConfig {
        endpoint: config.endpoint(),
        log_key: config.api.log_key.clone(),
        query: config.api.query.clone(),
        page_size: config.api.page_size,
        rate_limit_per_minute: config.api.rate_limit,
        retry_attempts: config.api.retry_attempts,
        poll_max_iterations: config.poll.max_iterations,
        poll_max_wall_secs: config.poll.max_wall_secs,
        poll_stuck_iterations: config.poll.stuck_iterations,
        poll_initial_delay_ms: config.poll.initial_delay_ms,
        poll_max_delay_ms: config.poll.max_delay_ms,
        poll_progress_log_every: config.poll.progress_log_every,
        max_pages: config.api.max_pages,
    }
}

fn merge_stats(acc: &mut StreamStats, other: &StreamStats) {
    acc.raw_events_seen += other.raw_events_seen;
    acc.duplicates_dropped += other.duplicates_dropped;
    acc.observed_min_ts_ms = merge_min(acc.observed_min_ts_ms, other.observed_min_ts_ms);
    acc.observed_max_ts_ms = merge_max(acc.observed_max_ts_ms, other.observed_max_ts_ms);
    acc.total_bytes_written += other.total_bytes_written;
    acc.part_bytes_min = merge_min(acc.part_bytes_min, other.part_bytes_min);
    acc.part_bytes_max = merge_max(acc.part_bytes_max, other.part_bytes_max);
}

fn merge_min<V: Ord + Copy>(a: Option<V>, b: Option<V>) -> Option<V> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (v, None) | (None, v) => v,
    }
}

fn merge_max<V: Ord + Copy>(a: Option<V>, b: Option<V>) -> Option<V> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (v, None) | (None, v) => v,
    }
}

fn empty_result() -> RunResult {
    RunResult {
        run_id: String::new(),
        log_key: String::new(),
        start_time: String::new(),
        end_time: String::new(),
        start_time_ms: 0,
        end_time_ms: 0,
        partition_date: None,
        output_paths: Vec::new(),
        rows_processed: 0,
        batches_processed: 0,
        parts_written: 0,
        segments_used: 0,
        cache_hit: false,
        cache_partial: false,
        cache_decision: CacheDecisionKind::Miss,
        dedupe_enabled: false,
        raw_events_seen: 0,
        duplicates_dropped: 0,
        observed_min_ts_ms: None,
        observed_max_ts_ms: None,
        total_bytes: 0,
        part_bytes_min: None,
        part_bytes_max: None,
        duration_seconds: 0.0,
    }
}
