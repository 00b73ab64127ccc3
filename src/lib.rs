//! logcache: a local segment cache for a hosted log-search API
//!
//! Fetching a time window of log events is slow and rate-limited, so
//! fetched windows are persisted as compressed segment files keyed by
//! their half-open time range. Later requests for overlapping windows
//! read the cached coverage back and fetch only the gaps.
//!
//! Modules:
//! - [`cache`]: segment discovery and interval gap reconciliation
//! - [`client`]: the provider's submit/poll/paginate query protocol
//! - [`storage`]: part file format and the deduplicating writer
//! - [`service`]: the run orchestrator tying the above together
//! - [`config`]: TOML config with environment overrides

pub mod cache;
pub mod client;
pub mod config;
pub mod service;
pub mod storage;

pub use config::Config;
pub use service::{IngestionService, RunError, RunResult};
pub use storage::{Event, TimeRange};
