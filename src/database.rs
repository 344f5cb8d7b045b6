//! Read-only access to merged databases
//!
//! A [`Database`] is opened once (memory-mapped) and answers longest-prefix
//! lookups straight from the mapped node tables. Records are decoded from the
//! value pool only when they are returned.
//!
//! # Examples
//!
//! ```no_run
//! use geomerge::Database;
//!
//! let db = Database::open("ASN_COUNTRY_AND_CITY.db")?;
//! if let Some(result) = db.lookup_str("203.0.113.10")? {
//!     println!("{} ({})", result.record.netname(), result.network);
//! }
//! # Ok::<(), geomerge::MergeError>(())
//! ```

use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MergeError, Result};
use crate::format::{meta, FileHeader};
use crate::network::{address_key, AddressFamily, Network};
use crate::node_table::{NodeTable, RecordSize, TreeWalk};
use crate::record::AttributeRecord;
use memmap2::Mmap;
use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

/// Storage for file data - either owned or memory-mapped
pub(crate) enum Storage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl Storage {
    /// Memory-map a file read-only
    pub(crate) fn map(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and files are replaced by rename,
        // never rewritten in place
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Storage::Mmap(mmap))
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mmap(m) => &m[..],
        }
    }
}

/// A longest-prefix match
///
/// `network` is the largest block around the address that resolves to the
/// same record. When a more specific network is carved out of the matching
/// one it is narrower than the registry range; that range is kept in the
/// record's `subnet`.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult<T = AttributeRecord> {
    /// Record of the matching network
    pub record: T,
    /// Prefix length of the matching network
    pub prefix_len: u8,
    /// The matching network
    pub network: Network,
}

/// A merged database
pub struct Database {
    data: Storage,
    header: FileHeader,
    record_size: RecordSize,
}

impl Database {
    /// Open a database file using memory mapping
    ///
    /// # Errors
    /// [`MergeError::Io`] if the file cannot be mapped, [`MergeError::Format`]
    /// if the header is invalid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let storage = Storage::map(path)
            .map_err(|e| MergeError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        Self::from_storage(storage)
    }

    /// Create a database from raw bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_storage(Storage::Owned(data))
    }

    fn from_storage(data: Storage) -> Result<Self> {
        let header = FileHeader::parse(data.as_slice())?;
        let record_size = header.record_size()?;
        Ok(Self {
            data,
            header,
            record_size,
        })
    }

    /// File header
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Record size of the node tables
    pub fn record_size(&self) -> RecordSize {
        self.record_size
    }

    /// Full metadata map
    pub fn metadata(&self) -> Result<DataValue> {
        let start = self.header.metadata_offset.get() as usize;
        let end = start + self.header.metadata_size.get() as usize;
        DataDecoder::new(&self.data.as_slice()[start..end])
            .decode(0)
            .map_err(|e| MergeError::Format(format!("metadata: {}", e)))
    }

    /// `database_type` from the metadata
    pub fn database_type(&self) -> Option<String> {
        self.metadata()
            .ok()?
            .get(meta::DATABASE_TYPE)
            .and_then(DataValue::as_str)
            .map(str::to_string)
    }

    /// Look up an address and decode its record
    pub fn lookup(&self, addr: IpAddr) -> Result<Option<LookupResult>> {
        match self.lookup_value(addr)? {
            Some(found) => Ok(Some(LookupResult {
                record: AttributeRecord::from_data_value(&found.record)?,
                prefix_len: found.prefix_len,
                network: found.network,
            })),
            None => Ok(None),
        }
    }

    /// Parse `ip` and look it up
    ///
    /// # Errors
    /// [`MergeError::InvalidAddress`] if `ip` is not an address.
    pub fn lookup_str(&self, ip: &str) -> Result<Option<LookupResult>> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| MergeError::InvalidAddress(format!("'{}' is not an IP address", ip)))?;
        self.lookup(addr)
    }

    /// Look up an address and return the raw persisted map
    pub fn lookup_value(&self, addr: IpAddr) -> Result<Option<LookupResult<DataValue>>> {
        let family = AddressFamily::of(&addr);
        let (offset, count) = match family {
            AddressFamily::V4 => (
                self.header.ipv4_nodes_offset.get(),
                self.header.ipv4_node_count.get(),
            ),
            AddressFamily::V6 => (
                self.header.ipv6_nodes_offset.get(),
                self.header.ipv6_node_count.get(),
            ),
        };
        let table = NodeTable::new(&self.data.as_slice()[offset as usize..], count, self.record_size)?;

        match table.walk(address_key(addr), 0, family.bit_width())? {
            TreeWalk::Data { offset, depth } => Ok(Some(LookupResult {
                record: self.resolve(offset)?,
                prefix_len: depth,
                network: Network::new(addr, depth)?,
            })),
            TreeWalk::NotFound { .. } => Ok(None),
            TreeWalk::Node(node) => Err(MergeError::Format(format!(
                "{} node table deeper than the address at node {}",
                family, node
            ))),
        }
    }

    fn resolve(&self, offset: u32) -> Result<DataValue> {
        let start = self.header.data_offset.get() as usize;
        let end = start + self.header.data_size.get() as usize;
        DataDecoder::new(&self.data.as_slice()[start..end])
            .decode(offset)
            .map_err(|e| MergeError::Format(format!("value pool: {}", e)))
    }
}
