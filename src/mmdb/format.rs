//! MMDB binary layout parsing
//!
//! Only the fields needed for lookups are extracted when a file is opened:
//! node count, record size, IP version and the bounds of the data section.
//! Everything else stays in the mapped file and is decoded on demand.

use super::types::{IpVersion, MmdbError, DATA_SECTION_SEPARATOR, METADATA_MARKER};
use crate::data_section::{DataDecoder, DataValue};
use crate::node_table::RecordSize;
use memchr::memmem;

/// Metadata must start within this many bytes of the end of the file
const METADATA_SEARCH_SIZE: usize = 128 * 1024;

/// Essential layout information of an MMDB file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmdbHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    /// First byte of the data section
    pub data_start: usize,
    /// One past the last byte of the data section (start of the marker)
    pub data_end: usize,
}

impl MmdbHeader {
    /// Parse the metadata of an MMDB file and derive the section layout
    pub fn from_file(data: &[u8]) -> Result<Self, MmdbError> {
        let marker_offset = find_metadata_marker(data)?;
        let metadata = decode_metadata(data, marker_offset)?;

        let node_count = extract_uint(&metadata, "node_count")?;
        let record_bits = extract_uint(&metadata, "record_size")?;
        let ip_version = match extract_uint(&metadata, "ip_version")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            other => {
                return Err(MmdbError::InvalidMetadata(format!(
                    "Invalid IP version: {}",
                    other
                )))
            }
        };

        let node_count = u32::try_from(node_count).map_err(|_| {
            MmdbError::InvalidMetadata(format!("node_count {} out of range", node_count))
        })?;
        let record_size = u16::try_from(record_bits)
            .ok()
            .and_then(RecordSize::from_bits)
            .ok_or_else(|| {
                MmdbError::InvalidFormat(format!("Invalid record size: {} bits", record_bits))
            })?;

        let tree_size = node_count as usize * record_size.node_bytes();
        let data_start = tree_size + DATA_SECTION_SEPARATOR;
        if data_start > marker_offset {
            return Err(MmdbError::InvalidFormat(format!(
                "search tree of {} bytes overlaps metadata at {}",
                tree_size, marker_offset
            )));
        }

        Ok(MmdbHeader {
            node_count,
            record_size,
            ip_version,
            tree_size,
            data_start,
            data_end: marker_offset,
        })
    }
}

/// Decode the full metadata map (allocates)
pub fn read_metadata(data: &[u8]) -> Result<DataValue, MmdbError> {
    let marker_offset = find_metadata_marker(data)?;
    decode_metadata(data, marker_offset)
}

fn decode_metadata(data: &[u8], marker_offset: usize) -> Result<DataValue, MmdbError> {
    let metadata_bytes = &data[marker_offset + METADATA_MARKER.len()..];
    let metadata = DataDecoder::new(metadata_bytes)
        .decode(0)
        .map_err(|e| MmdbError::InvalidMetadata(format!("Failed to decode metadata: {}", e)))?;
    match metadata {
        DataValue::Map(_) => Ok(metadata),
        _ => Err(MmdbError::InvalidMetadata("Metadata is not a map".to_string())),
    }
}

/// Find the metadata marker
///
/// The marker appears somewhere in the last 128KB of the file and the
/// metadata follows it. If there are several, the last one wins.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize, MmdbError> {
    let search_start = data.len().saturating_sub(METADATA_SEARCH_SIZE);
    memmem::rfind(&data[search_start..], METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or(MmdbError::MetadataNotFound)
}

fn extract_uint(metadata: &DataValue, key: &str) -> Result<u64, MmdbError> {
    match metadata.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            MmdbError::InvalidMetadata(format!("Field '{}' is not an unsigned integer", key))
        }),
        None => Err(MmdbError::InvalidMetadata(format!(
            "Required field '{}' not found",
            key
        ))),
    }
}
