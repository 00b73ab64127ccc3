//! Local segment cache
//!
//! Tracks which time windows of a log are already on disk and computes
//! the gaps a requested window still needs fetched.

pub mod range;
pub mod store;

pub use range::{missing_subranges, normalize};
pub use store::{cached_ranges, disk_footprint, list_segments, segment_dir, CacheSegment};
