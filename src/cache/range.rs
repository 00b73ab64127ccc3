//! Half-open interval algebra over cached time ranges
//!
//! All ranges are `[start, end)` in epoch milliseconds. The reconciler
//! compares a requested window against the normalized union of cached
//! ranges and returns the gaps that still need fetching.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::TimeRange;

/// Normalize a set of ranges: sort, drop empty ranges, merge overlapping
/// and adjacent ones. The result is sorted and pairwise disjoint with no
/// two ranges touching.
pub fn normalize(ranges: &[TimeRange]) -> Vec<TimeRange> {
    let mut valid: Vec<TimeRange> = ranges.iter().copied().filter(|r| r.end > r.start).collect();
    valid.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(valid.len());
    for range in valid {
        match merged.last_mut() {
            // Adjacency counts as mergeable: [a, b) + [b, c) = [a, c)
            Some(prev) if range.start <= prev.end => {
                prev.end = prev.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Compute the subranges of `[requested_start, requested_end)` not
/// covered by `cached`.
///
/// Cached ranges are normalized first and clipped to the requested
/// window. An empty request window is an error; an empty result means
/// the window is fully covered.
pub fn missing_subranges(
    requested_start: i64,
    requested_end: i64,
    cached: &[TimeRange],
) -> StorageResult<Vec<TimeRange>> {
    if requested_end <= requested_start {
        return Err(StorageError::InvalidTimeRange);
    }

    let mut gaps = Vec::new();
    let mut cursor = requested_start;

    for range in normalize(cached) {
        if range.end <= cursor {
            continue;
        }
        if range.start >= requested_end {
            break;
        }
        if range.start > cursor {
            gaps.push(TimeRange::new(cursor, range.start.min(requested_end)));
        }
        cursor = cursor.max(range.end);
        if cursor >= requested_end {
            break;
        }
    }

    if cursor < requested_end {
        gaps.push(TimeRange::new(cursor, requested_end));
    }

    Ok(gaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: i64, end: i64) -> TimeRange {
        TimeRange::new(start, end)
    }

    #[test]
    fn test_normalize_sorts_and_merges_overlaps() {
        let out = normalize(&[r(50, 70), r(0, 10), r(5, 20)]);
        assert_eq!(out, vec![r(0, 20), r(50, 70)]);
    }

    #[test]
    fn test_normalize_merges_adjacent() {
        let out = normalize(&[r(0, 10), r(10, 20)]);
        assert_eq!(out, vec![r(0, 20)]);
    }

    #[test]
    fn test_normalize_drops_empty_ranges() {
        let degenerate = TimeRange { start: 10, end: 10 };
        let inverted = TimeRange { start: 20, end: 5 };
        let out = normalize(&[degenerate, inverted, r(0, 5)]);
        assert_eq!(out, vec![r(0, 5)]);
    }

    #[test]
    fn test_missing_empty_cache_is_full_window() {
        let gaps = missing_subranges(100, 200, &[]).unwrap();
        assert_eq!(gaps, vec![r(100, 200)]);
    }

    #[test]
    fn test_missing_full_containment_is_no_gap() {
        let gaps = missing_subranges(100, 200, &[r(50, 300)]).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_missing_exact_cover_is_no_gap() {
        let gaps = missing_subranges(100, 200, &[r(100, 200)]).unwrap();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_missing_gap_in_middle() {
        let gaps = missing_subranges(0, 100, &[r(0, 40), r(60, 100)]).unwrap();
        assert_eq!(gaps, vec![r(40, 60)]);
    }

    #[test]
    fn test_missing_gaps_at_both_edges() {
        let gaps = missing_subranges(0, 100, &[r(20, 80)]).unwrap();
        assert_eq!(gaps, vec![r(0, 20), r(80, 100)]);
    }

    #[test]
    fn test_missing_clips_to_window() {
        // Cached ranges extending past the window never produce gaps
        // outside it
        let gaps = missing_subranges(50, 150, &[r(0, 60), r(140, 200)]).unwrap();
        assert_eq!(gaps, vec![r(60, 140)]);
    }

    #[test]
    fn test_missing_ignores_disjoint_cache() {
        let gaps = missing_subranges(100, 200, &[r(0, 50), r(300, 400)]).unwrap();
        assert_eq!(gaps, vec![r(100, 200)]);
    }

    #[test]
    fn test_missing_invalid_window_errors() {
        assert!(missing_subranges(100, 100, &[]).is_err());
        assert!(missing_subranges(200, 100, &[]).is_err());
    }

    #[test]
    fn test_gaps_and_cache_partition_the_window() {
        // Gaps plus clipped cached coverage must tile the window exactly
        let cached = [r(0, 15), r(10, 30), r(45, 50), r(50, 55), r(90, 120)];
        let gaps = missing_subranges(5, 100, &cached).unwrap();

        assert_eq!(gaps, vec![r(30, 45), r(55, 90)]);

        // Sorted and disjoint
        for pair in gaps.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }

        // Every gap lies inside the window and outside cached coverage
        for gap in &gaps {
            assert!(gap.start >= 5 && gap.end <= 100);
            for c in normalize(&cached) {
                assert!(!gap.overlaps(&c));
            }
        }
    }
}
