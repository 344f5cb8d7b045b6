//! MMDB-specific type definitions

use crate::error::MergeError;
use crate::point_lookup::LookupError;
use std::fmt;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Size of the zero separator between the search tree and the data section
pub const DATA_SECTION_SEPARATOR: usize = 16;

/// MMDB-specific error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmdbError {
    /// Invalid file format
    InvalidFormat(String),
    /// Metadata not found
    MetadataNotFound,
    /// Invalid metadata structure
    InvalidMetadata(String),
    /// Data decoding error
    DecodeError(String),
    /// IO error
    IoError(String),
}

impl fmt::Display for MmdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmdbError::InvalidFormat(msg) => write!(f, "Invalid MMDB format: {}", msg),
            MmdbError::MetadataNotFound => write!(f, "MMDB metadata marker not found"),
            MmdbError::InvalidMetadata(msg) => write!(f, "Invalid metadata: {}", msg),
            MmdbError::DecodeError(msg) => write!(f, "Data decode error: {}", msg),
            MmdbError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for MmdbError {}

impl From<MergeError> for MmdbError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Io(msg) => MmdbError::IoError(msg),
            MergeError::Format(msg) => MmdbError::InvalidFormat(msg),
            other => MmdbError::InvalidFormat(other.to_string()),
        }
    }
}

impl From<MmdbError> for LookupError {
    fn from(err: MmdbError) -> Self {
        LookupError(err.to_string())
    }
}

impl From<MmdbError> for MergeError {
    fn from(err: MmdbError) -> Self {
        match err {
            MmdbError::IoError(msg) => MergeError::Io(msg),
            other => MergeError::Format(other.to_string()),
        }
    }
}

/// IP version of a search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (IPv4 lives under ::/96)
    V6,
}

impl IpVersion {
    /// Depth of the tree in bits
    pub fn bit_width(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}
