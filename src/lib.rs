//! GeoMerge - Registry Ranges Merged into a Longest-Prefix-Match IP Database
//!
//! GeoMerge takes the IP ranges exported from Regional Internet Registry
//! dumps, validates and canonicalizes them, enriches each one with ASN and
//! city/country attributes from two point-lookup databases, and writes a
//! single compact file that answers "which registry range, AS and location
//! does this address belong to?" by longest-prefix match.
//!
//! # Quick Start
//!
//! ```rust
//! use geomerge::{
//!     BuildOptions, Database, Enricher, NetworkBuilder, NoLookup, Pipeline, RangeRecord,
//!     Serializer,
//! };
//!
//! let ranges = vec![
//!     Ok::<_, geomerge::MergeError>(RangeRecord::new("203.0.113.0", 4, 24, "EXAMPLE-NET", None)),
//!     Ok(RangeRecord::new("203.0.113.128", 4, 25, "EXAMPLE-SUB", None)),
//!     Ok(RangeRecord::new("10.0.0.5", 4, 24, "PRIVATE", None)),
//! ];
//!
//! // No ASN/City databases here: those attributes stay absent
//! let enricher = Enricher::new(&NoLookup, &NoLookup);
//! let pipeline = Pipeline::new(NetworkBuilder::new(), enricher, BuildOptions::default());
//! let output = pipeline.run(ranges)?;
//! assert_eq!(output.stats.skipped_reserved, 1);
//!
//! let mut bytes = Vec::new();
//! Serializer::new().serialize(&output.store, &mut bytes)?;
//!
//! let db = Database::from_bytes(bytes)?;
//! let hit = db.lookup_str("203.0.113.200")?.expect("covered");
//! assert_eq!(hit.record.netname(), "EXAMPLE-SUB");
//! assert_eq!(hit.record.maintainer(), "Unknown");
//! # Ok::<(), geomerge::MergeError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! RangeSource ──► NetworkBuilder ──► Enricher ──► TrieStore ──► Serializer
//!  (CSV rows)     (validate,         (ASN + City   (v4 + v6      (node tables,
//!                  mask host bits)    lookups)      tries)        value pool)
//! ```
//!
//! The output file is laid out as:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  64-byte header ("GEOMERGE" v1.0)    │
//! ├──────────────────────────────────────┤
//! │  1. IPv4 node table                  │
//! │  2. IPv6 node table                  │
//! │  3. Value pool (deduplicated)        │
//! │  4. Metadata                         │
//! └──────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
/// Data section encoding/decoding
pub mod data_section;
/// Read-only access to built databases
pub mod database;
pub mod enrich;
/// Error types for merge and build operations
pub mod error;
pub mod format;
/// MaxMind DB reader used as an enrichment source
pub mod mmdb;
pub mod network;
pub mod node_table;
pub mod pipeline;
pub mod point_lookup;
pub mod record;
pub mod serializer;
pub mod source;
pub mod trie;

// Re-exports for Rust consumers

/// Built database and lookup results
pub use crate::database::{Database, LookupResult};
/// Data value type for value pool entries
pub use crate::data_section::DataValue;
pub use crate::enrich::{AsnInfo, CityInfo, Enricher};
pub use crate::error::{MergeError, Result};
pub use crate::mmdb::{MmdbError, MmdbReader};
pub use crate::network::{AddressFamily, Network, NetworkBuilder};
pub use crate::node_table::RecordSize;
pub use crate::pipeline::{publish, BuildOptions, BuildOutput, BuildStats, Pipeline};
pub use crate::point_lookup::{LookupError, NoLookup, PointLookup, StaticLookup};
pub use crate::record::{AttributeRecord, RangeRecord, SourceAttributes};
pub use crate::serializer::{OutputFormat, Serializer};
pub use crate::source::CsvRangeSource;
pub use crate::trie::{IpTrie, TrieStore};

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
