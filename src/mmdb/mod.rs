//! MaxMind DB (MMDB) reader
//!
//! The ASN and City enrichment sources are MaxMind DB files. Their search
//! tree uses the same node encoding as [`crate::node_table`] and their data
//! section uses the encoding of [`crate::data_section`], so this module only
//! adds metadata parsing and the IPv4-in-IPv6 start node.

pub mod format;
pub mod reader;
pub mod types;

pub use format::{find_metadata_marker, read_metadata, MmdbHeader};
pub use reader::MmdbReader;
pub use types::{IpVersion, MmdbError, DATA_SECTION_SEPARATOR, METADATA_MARKER};
