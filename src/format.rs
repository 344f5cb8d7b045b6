//! On-disk layout of a merged database
//!
//! ```text
//! [header 64 bytes][IPv4 node table][IPv6 node table][value pool][metadata]
//! ```
//!
//! Header integers are little-endian. Node records are big-endian and follow
//! [`crate::node_table`]. The value pool and the metadata map use the
//! encoding of [`crate::data_section`]; pool pointers are relative to the
//! start of the pool.

use crate::error::{MergeError, Result};
use crate::node_table::RecordSize;
use std::mem;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Magic bytes identifying a merged database
pub const MAGIC: &[u8; 8] = b"GEOMERGE";

/// Format major version; readers reject any other major version
pub const FORMAT_MAJOR: u16 = 1;

/// Format minor version
pub const FORMAT_MINOR: u16 = 0;

/// Size of [`FileHeader`] in bytes
pub const HEADER_SIZE: usize = 64;

/// Metadata map keys
pub mod meta {
    /// Format major version (uint16)
    pub const FORMAT_MAJOR: &str = "binary_format_major_version";
    /// Format minor version (uint16)
    pub const FORMAT_MINOR: &str = "binary_format_minor_version";
    /// Free-form database type name
    pub const DATABASE_TYPE: &str = "database_type";
    /// Map of language code to description
    pub const DESCRIPTION: &str = "description";
    /// Languages of the description map
    pub const LANGUAGES: &str = "languages";
    /// Record size in bits (uint16)
    pub const RECORD_SIZE: &str = "record_size";
    /// IPv4 node count (uint32)
    pub const IPV4_NODE_COUNT: &str = "ipv4_node_count";
    /// IPv6 node count (uint32)
    pub const IPV6_NODE_COUNT: &str = "ipv6_node_count";
    /// Number of IPv4 networks carrying a record (uint64)
    pub const IPV4_NETWORK_COUNT: &str = "ipv4_network_count";
    /// Number of IPv6 networks carrying a record (uint64)
    pub const IPV6_NETWORK_COUNT: &str = "ipv6_network_count";
    /// Seconds since the Unix epoch (uint64), optional
    pub const BUILD_EPOCH: &str = "build_epoch";
}

/// Fixed file header
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FileHeader {
    /// Magic bytes: "GEOMERGE"
    pub magic: [u8; 8],
    /// Format major version
    pub format_major: U16,
    /// Format minor version
    pub format_minor: U16,
    /// Record size in bits (24, 28, 32)
    pub record_size: U16,
    /// Reserved, zero
    pub reserved0: U16,
    /// IPv4 node count
    pub ipv4_node_count: U32,
    /// IPv6 node count
    pub ipv6_node_count: U32,
    /// Offset of the IPv4 node table
    pub ipv4_nodes_offset: U32,
    /// Offset of the IPv6 node table
    pub ipv6_nodes_offset: U32,
    /// Offset of the value pool
    pub data_offset: U32,
    /// Size of the value pool
    pub data_size: U32,
    /// Offset of the metadata map
    pub metadata_offset: U32,
    /// Size of the metadata map
    pub metadata_size: U32,
    /// Size of the whole file
    pub total_size: U32,
    /// Reserved, zero
    pub reserved1: [u8; 12],
}

const _: () = assert!(mem::size_of::<FileHeader>() == HEADER_SIZE);

/// Section sizes used to lay out a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Record size shared by both node tables
    pub record_size: RecordSize,
    /// IPv4 node count
    pub ipv4_node_count: u32,
    /// IPv6 node count
    pub ipv6_node_count: u32,
    /// Value pool size in bytes
    pub data_size: usize,
    /// Metadata size in bytes
    pub metadata_size: usize,
}

impl FileHeader {
    /// Compute section offsets for `layout`
    ///
    /// # Errors
    /// [`MergeError::Format`] if the file would exceed 4 GiB.
    pub fn for_layout(layout: &Layout) -> Result<Self> {
        let node_bytes = layout.record_size.node_bytes() as u64;
        let ipv4_nodes_offset = HEADER_SIZE as u64;
        let ipv6_nodes_offset = ipv4_nodes_offset + layout.ipv4_node_count as u64 * node_bytes;
        let data_offset = ipv6_nodes_offset + layout.ipv6_node_count as u64 * node_bytes;
        let metadata_offset = data_offset + layout.data_size as u64;
        let total_size = metadata_offset + layout.metadata_size as u64;

        let narrow = |value: u64| -> Result<U32> {
            u32::try_from(value).map(U32::new).map_err(|_| {
                MergeError::Format(format!("database of {} bytes exceeds 4 GiB", total_size))
            })
        };

        Ok(Self {
            magic: *MAGIC,
            format_major: U16::new(FORMAT_MAJOR),
            format_minor: U16::new(FORMAT_MINOR),
            record_size: U16::new(layout.record_size.bits()),
            reserved0: U16::new(0),
            ipv4_node_count: U32::new(layout.ipv4_node_count),
            ipv6_node_count: U32::new(layout.ipv6_node_count),
            ipv4_nodes_offset: narrow(ipv4_nodes_offset)?,
            ipv6_nodes_offset: narrow(ipv6_nodes_offset)?,
            data_offset: narrow(data_offset)?,
            data_size: narrow(layout.data_size as u64)?,
            metadata_offset: narrow(metadata_offset)?,
            metadata_size: narrow(layout.metadata_size as u64)?,
            total_size: narrow(total_size)?,
            reserved1: [0; 12],
        })
    }

    /// Read and validate the header of `data`
    ///
    /// # Errors
    /// [`MergeError::Format`] on bad magic, an unknown major version, an
    /// unknown record size, or sections outside the buffer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, _) = FileHeader::read_from_prefix(data).map_err(|_| {
            MergeError::Format(format!(
                "file of {} bytes is too small for a header",
                data.len()
            ))
        })?;

        if &header.magic != MAGIC {
            return Err(MergeError::Format("bad magic bytes".to_string()));
        }
        if header.format_major.get() != FORMAT_MAJOR {
            return Err(MergeError::Format(format!(
                "unsupported format version {}.{}",
                header.format_major.get(),
                header.format_minor.get()
            )));
        }
        let record_size = header.record_size()?;

        if header.total_size.get() as usize != data.len() {
            return Err(MergeError::Format(format!(
                "header says {} bytes, file has {}",
                header.total_size.get(),
                data.len()
            )));
        }

        let node_bytes = record_size.node_bytes() as u64;
        let sections = [
            (
                "IPv4 node table",
                header.ipv4_nodes_offset.get(),
                header.ipv4_node_count.get() as u64 * node_bytes,
            ),
            (
                "IPv6 node table",
                header.ipv6_nodes_offset.get(),
                header.ipv6_node_count.get() as u64 * node_bytes,
            ),
            (
                "value pool",
                header.data_offset.get(),
                header.data_size.get() as u64,
            ),
            (
                "metadata",
                header.metadata_offset.get(),
                header.metadata_size.get() as u64,
            ),
        ];
        for (name, offset, size) in sections {
            if (offset as u64) < HEADER_SIZE as u64 || offset as u64 + size > data.len() as u64 {
                return Err(MergeError::Format(format!(
                    "{} at {}+{} is outside the file",
                    name, offset, size
                )));
            }
        }

        Ok(header)
    }

    /// Record size of both node tables
    pub fn record_size(&self) -> Result<RecordSize> {
        RecordSize::from_bits(self.record_size.get()).ok_or_else(|| {
            MergeError::Format(format!("invalid record size {}", self.record_size.get()))
        })
    }
}
