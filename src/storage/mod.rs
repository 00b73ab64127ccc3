//! On-disk event storage
//!
//! Events are persisted as compressed part files grouped into segment
//! directories, one directory per contiguous time window. The writer
//! streams pages in and flushes bounded batches; readers verify
//! checksums on every read.

pub mod error;
pub mod part;
pub mod types;
pub mod writer;

pub use error::{StorageError, StorageResult};
pub use part::{DatasetSummary, PartHeader, PART_EXTENSION};
pub use types::{Event, TimeRange};
pub use writer::{SegmentWriter, StreamStats, WriteOutcome, WriterConfig};
