//! Part file format for cache segments
//!
//! Each flush of the streaming writer produces one self-contained part
//! file inside a segment directory. Row counts and event-timestamp bounds
//! live in a fixed-size header so read-back accounting never has to
//! decompress event data.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "LSEG"               │
//! │   version: u16                          │
//! │   row_count: u32                        │
//! │   min_timestamp: i64                    │
//! │   max_timestamp: i64                    │
//! │   compression: u8                       │
//! │   reserved: [u8; 33]                    │
//! │   checksum: u32                         │
//! ├─────────────────────────────────────────┤
//! │ BLOCK                                   │
//! │   block_size: u32                       │
//! │   compressed_events: [u8; block_size]   │
//! │   block_checksum: u32                   │
//! └─────────────────────────────────────────┘
//! ```

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Event;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for part file identification
const PART_MAGIC: [u8; 4] = *b"LSEG";

/// Current part format version
const PART_VERSION: u16 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 64;

/// Part file extension
pub const PART_EXTENSION: &str = "seg";

/// Compression type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Lz4 = 1,
}

impl TryFrom<u8> for CompressionType {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            _ => Err(StorageError::InvalidPart(format!(
                "Unknown compression type: {}",
                value
            ))),
        }
    }
}

/// Part file header
#[derive(Debug, Clone)]
pub struct PartHeader {
    /// Magic bytes (should be "LSEG")
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    /// Number of events in the part
    pub row_count: u32,
    /// Minimum event timestamp (i64::MAX when no event carried one)
    pub min_timestamp: i64,
    /// Maximum event timestamp (i64::MIN when no event carried one)
    pub max_timestamp: i64,
    /// Compression type used for the event block
    pub compression: CompressionType,
    /// Header checksum
    pub checksum: u32,
}

impl PartHeader {
    fn new(compression: CompressionType) -> Self {
        Self {
            magic: PART_MAGIC,
            version: PART_VERSION,
            row_count: 0,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            compression,
            checksum: 0,
        }
    }

    /// Timestamp bounds observed in this part, if any event carried one.
    pub fn timestamp_bounds(&self) -> Option<(i64, i64)> {
        if self.min_timestamp <= self.max_timestamp {
            Some((self.min_timestamp, self.max_timestamp))
        } else {
            None
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.row_count.to_le_bytes());
        buf[10..18].copy_from_slice(&self.min_timestamp.to_le_bytes());
        buf[18..26].copy_from_slice(&self.max_timestamp.to_le_bytes());
        buf[26] = self.compression as u8;
        // bytes 27-59 reserved

        // Checksum covers everything before the checksum field
        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> StorageResult<Self> {
        // Verify checksum first
        let stored_checksum = u32::from_le_bytes([buf[60], buf[61], buf[62], buf[63]]);
        let computed_checksum = crc32fast::hash(&buf[0..60]);

        if stored_checksum != computed_checksum {
            return Err(StorageError::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);

        if magic != PART_MAGIC {
            return Err(StorageError::InvalidPart(format!(
                "Invalid magic: {:?}",
                magic
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > PART_VERSION {
            return Err(StorageError::InvalidPart(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let row_count = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);
        let min_timestamp = i64::from_le_bytes([
            buf[10], buf[11], buf[12], buf[13], buf[14], buf[15], buf[16], buf[17],
        ]);
        let max_timestamp = i64::from_le_bytes([
            buf[18], buf[19], buf[20], buf[21], buf[22], buf[23], buf[24], buf[25],
        ]);
        let compression = CompressionType::try_from(buf[26])?;

        Ok(Self {
            magic,
            version,
            row_count,
            min_timestamp,
            max_timestamp,
            compression,
            checksum: stored_checksum,
        })
    }
}

/// Path of part file `idx` inside a segment directory: `part-00000.seg`
pub fn part_path(segment_dir: &Path, idx: u32) -> PathBuf {
    segment_dir.join(format!("part-{:05}.{}", idx, PART_EXTENSION))
}

/// Write a batch of events as a new part file.
///
/// The file is written to a temporary sibling first and renamed into
/// place so readers never observe a half-written part. Returns the final
/// path and the number of bytes written.
pub fn write_part(
    segment_dir: &Path,
    idx: u32,
    events: &[Event],
) -> StorageResult<(PathBuf, u64)> {
    std::fs::create_dir_all(segment_dir)?;

    let serialized = serde_json::to_vec(events)?;
    let compressed = lz4_flex::compress_prepend_size(&serialized);
    let block_checksum = crc32fast::hash(&compressed);

    let mut header = PartHeader::new(CompressionType::Lz4);
    header.row_count = events.len() as u32;
    for event in events {
        if let Some(ts) = event.timestamp_ms() {
            header.min_timestamp = header.min_timestamp.min(ts);
            header.max_timestamp = header.max_timestamp.max(ts);
        }
    }

    let path = part_path(segment_dir, idx);
    let tmp_path = path.with_extension(format!("{}.tmp", PART_EXTENSION));

    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(&header.to_bytes())?;
        writer.write_all(&(compressed.len() as u32).to_le_bytes())?;
        writer.write_all(&compressed)?;
        writer.write_all(&block_checksum.to_le_bytes())?;
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, &path)?;

    let bytes_written = (HEADER_SIZE + 4 + compressed.len() + 4) as u64;
    Ok((path, bytes_written))
}

/// Read only the header of a part file (cheap: 64 bytes)
pub fn read_header(path: &Path) -> StorageResult<PartHeader> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf)?;
    PartHeader::from_bytes(&buf)
}

/// Read and decode all events from a part file
pub fn read_part(path: &Path) -> StorageResult<Vec<Event>> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf)?;
    let header = PartHeader::from_bytes(&header_buf)?;

    let mut size_buf = [0u8; 4];
    reader.read_exact(&mut size_buf)?;
    let block_size = u32::from_le_bytes(size_buf);

    let mut compressed = vec![0u8; block_size as usize];
    reader.read_exact(&mut compressed)?;

    let mut checksum_buf = [0u8; 4];
    reader.read_exact(&mut checksum_buf)?;
    let stored_checksum = u32::from_le_bytes(checksum_buf);
    let computed_checksum = crc32fast::hash(&compressed);

    if stored_checksum != computed_checksum {
        return Err(StorageError::Corruption(format!(
            "Block checksum mismatch in {:?}",
            path
        )));
    }

    let serialized = match header.compression {
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StorageError::Compression(format!("LZ4 decompression failed: {}", e)))?,
        CompressionType::None => compressed,
    };

    let events: Vec<Event> = serde_json::from_slice(&serialized)?;

    if events.len() as u32 != header.row_count {
        return Err(StorageError::Corruption(format!(
            "Row count mismatch in {:?}: header={}, decoded={}",
            path,
            header.row_count,
            events.len()
        )));
    }

    Ok(events)
}

/// List part files in a segment directory, sorted by name.
///
/// Unrelated files (temp files, foreign names) are skipped.
pub fn list_parts(segment_dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut parts = Vec::new();

    for entry in std::fs::read_dir(segment_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if name.starts_with("part-") && name.ends_with(&format!(".{}", PART_EXTENSION)) {
            parts.push(path);
        }
    }

    parts.sort();
    Ok(parts)
}

/// Metadata-derived summary of one segment directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    /// Total rows across all parts
    pub row_count: u64,
    /// Number of part files
    pub part_count: u64,
    /// Minimum event timestamp across parts, if any
    pub min_timestamp: Option<i64>,
    /// Maximum event timestamp across parts, if any
    pub max_timestamp: Option<i64>,
}

/// Summarize a segment directory from part headers alone.
///
/// Errors on unreadable or corrupt part headers; callers decide whether
/// corruption is fatal.
pub fn dataset_summary(segment_dir: &Path) -> StorageResult<DatasetSummary> {
    let mut summary = DatasetSummary {
        row_count: 0,
        part_count: 0,
        min_timestamp: None,
        max_timestamp: None,
    };

    for part in list_parts(segment_dir)? {
        let header = read_header(&part)?;
        summary.row_count += header.row_count as u64;
        summary.part_count += 1;
        if let Some((min_ts, max_ts)) = header.timestamp_bounds() {
            summary.min_timestamp = Some(summary.min_timestamp.map_or(min_ts, |v| v.min(min_ts)));
            summary.max_timestamp = Some(summary.max_timestamp.map_or(max_ts, |v| v.max(max_ts)));
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(ts: i64, message: &str) -> Event {
        serde_json::from_value(json!({"timestamp": ts, "message": message})).unwrap()
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = PartHeader::new(CompressionType::Lz4);
        header.row_count = 5;
        header.min_timestamp = 1000;
        header.max_timestamp = 5000;

        let bytes = header.to_bytes();
        let restored = PartHeader::from_bytes(&bytes).unwrap();

        assert_eq!(restored.magic, PART_MAGIC);
        assert_eq!(restored.version, PART_VERSION);
        assert_eq!(restored.row_count, 5);
        assert_eq!(restored.timestamp_bounds(), Some((1000, 5000)));
        assert_eq!(restored.compression, CompressionType::Lz4);
    }

    #[test]
    fn test_header_checksum_detects_corruption() {
        let header = PartHeader::new(CompressionType::Lz4);
        let mut bytes = header.to_bytes();
        bytes[7] ^= 0xFF;

        let err = PartHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[test]
    fn test_write_and_read_part() {
        let dir = tempdir().unwrap();
        let events: Vec<Event> = (0..100).map(|i| event(1000 + i * 100, "hello")).collect();

        let (path, bytes) = write_part(dir.path(), 0, &events).unwrap();
        assert!(path.ends_with("part-00000.seg"));
        assert!(bytes > 0);

        let restored = read_part(&path).unwrap();
        assert_eq!(restored, events);

        let header = read_header(&path).unwrap();
        assert_eq!(header.row_count, 100);
        assert_eq!(header.timestamp_bounds(), Some((1000, 10900)));
    }

    #[test]
    fn test_read_part_detects_block_corruption() {
        let dir = tempdir().unwrap();
        let (path, _) = write_part(dir.path(), 0, &[event(1000, "a")]).unwrap();

        // Flip a byte inside the compressed block
        let mut raw = std::fs::read(&path).unwrap();
        let idx = raw.len() - 8;
        raw[idx] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let err = read_part(&path).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[test]
    fn test_events_without_timestamps_have_no_bounds() {
        let dir = tempdir().unwrap();
        let events: Vec<Event> =
            vec![serde_json::from_value(json!({"message": "no ts"})).unwrap()];

        let (path, _) = write_part(dir.path(), 0, &events).unwrap();
        let header = read_header(&path).unwrap();
        assert_eq!(header.row_count, 1);
        assert_eq!(header.timestamp_bounds(), None);
    }

    #[test]
    fn test_list_parts_skips_foreign_files() {
        let dir = tempdir().unwrap();
        write_part(dir.path(), 1, &[event(1, "a")]).unwrap();
        write_part(dir.path(), 0, &[event(2, "b")]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        std::fs::write(dir.path().join("part-00009.seg.tmp"), b"incomplete").unwrap();

        let parts = list_parts(dir.path()).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with("part-00000.seg"));
        assert!(parts[1].ends_with("part-00001.seg"));
    }

    #[test]
    fn test_dataset_summary_sums_headers() {
        let dir = tempdir().unwrap();
        write_part(dir.path(), 0, &[event(1000, "a"), event(2000, "b")]).unwrap();
        write_part(dir.path(), 1, &[event(500, "c")]).unwrap();

        let summary = dataset_summary(dir.path()).unwrap();
        assert_eq!(summary.row_count, 3);
        assert_eq!(summary.part_count, 2);
        assert_eq!(summary.min_timestamp, Some(500));
        assert_eq!(summary.max_timestamp, Some(2000));
    }

    #[test]
    fn test_dataset_summary_corrupt_part_errors() {
        let dir = tempdir().unwrap();
        let (path, _) = write_part(dir.path(), 0, &[event(1000, "a")]).unwrap();
        std::fs::write(&path, b"garbage that is not a part file header").unwrap();

        assert!(dataset_summary(dir.path()).is_err());
    }
}
