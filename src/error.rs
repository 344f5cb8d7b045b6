/// Error types for the geomerge library
use crate::network::AddressFamily;
use std::fmt;
use std::net::IpAddr;

/// Result type alias for geomerge operations
pub type Result<T> = std::result::Result<T, MergeError>;

/// Main error type for the merge-and-build pipeline
///
/// Per-record validation failures ([`MergeError::InvalidAddress`],
/// [`MergeError::InvalidPrefix`]) and [`MergeError::ReservedOrPrivate`] skips
/// are recoverable: the pipeline logs them, counts them and moves on.
/// Everything else aborts the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// Address string is not a valid IPv4/IPv6 literal for the declared family
    InvalidAddress(String),

    /// Prefix length outside `0..=32` (IPv4) or `0..=128` (IPv6)
    InvalidPrefix {
        /// Prefix length as supplied by the source
        prefix_len: i64,
        /// Family the prefix was checked against
        family: AddressFamily,
    },

    /// Address falls in a private, loopback or link-local range
    ReservedOrPrivate(IpAddr),

    /// Network inserted into the trie of the other address family
    ConflictingFamily {
        /// Family of the trie
        expected: AddressFamily,
        /// Family of the network
        found: AddressFamily,
    },

    /// A point-lookup source reported a structural failure
    EnrichmentLookup(String),

    /// I/O errors
    Io(String),

    /// Malformed or oversized database structures
    Format(String),

    /// The range source could not be read
    Source(String),
}

impl MergeError {
    /// True when the failing record should be skipped and the build continued
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MergeError::InvalidAddress(_)
                | MergeError::InvalidPrefix { .. }
                | MergeError::ReservedOrPrivate(_)
        )
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            MergeError::InvalidPrefix { prefix_len, family } => write!(
                f,
                "Invalid prefix length {} for {} (max {})",
                prefix_len,
                family,
                family.bit_width()
            ),
            MergeError::ReservedOrPrivate(addr) => {
                write!(f, "Address {} is reserved or private", addr)
            }
            MergeError::ConflictingFamily { expected, found } => write!(
                f,
                "Cannot insert {} network into {} tree",
                found, expected
            ),
            MergeError::EnrichmentLookup(msg) => write!(f, "Enrichment lookup failed: {}", msg),
            MergeError::Io(msg) => write!(f, "I/O error: {}", msg),
            MergeError::Format(msg) => write!(f, "Format error: {}", msg),
            MergeError::Source(msg) => write!(f, "Range source error: {}", msg),
        }
    }
}

impl std::error::Error for MergeError {}

impl From<std::io::Error> for MergeError {
    fn from(err: std::io::Error) -> Self {
        MergeError::Io(err.to_string())
    }
}
