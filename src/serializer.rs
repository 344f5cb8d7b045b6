//! Flattening of a [`TrieStore`] into a database file
//!
//! Each family's trie becomes a node table. A populated node's record is
//! pushed down onto every empty edge below it, so a table walk stops at the
//! same record the in-memory longest-prefix lookup returns. Records go into
//! one shared value pool, deduplicated by encoded bytes.
//!
//! Two layouts are written: the `GEOMERGE` container read by
//! [`crate::Database`], and a standard MaxMind DB file (one IPv6 tree, IPv4
//! under `::/96`) that any MaxMind reader can open.

use crate::data_section::{DataEncoder, DataValue};
use crate::error::{MergeError, Result};
use crate::format::{meta, FileHeader, Layout};
use crate::mmdb::{DATA_SECTION_SEPARATOR, METADATA_MARKER};
use crate::network::AddressFamily;
use crate::node_table::{max_record_value, write_node_table, RecordSize, Slot};
use crate::record::AttributeRecord;
use crate::trie::{IpTrie, NodeId, TrieStore, ROOT};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use zerocopy::IntoBytes;

/// Database type written when none is configured
pub const DEFAULT_DATABASE_TYPE: &str = "GeoMerge-ASN-Country-City";

const DEFAULT_DESCRIPTION: &str = "Registry ranges merged with ASN, country and city attributes";

/// Values that can be stored in the value pool
pub trait PoolValue {
    /// Persisted form of the value
    fn to_data_value(&self) -> DataValue;
}

impl PoolValue for AttributeRecord {
    fn to_data_value(&self) -> DataValue {
        AttributeRecord::to_data_value(self)
    }
}

impl PoolValue for DataValue {
    fn to_data_value(&self) -> DataValue {
        self.clone()
    }
}

impl<T: PoolValue + ?Sized> PoolValue for &T {
    fn to_data_value(&self) -> DataValue {
        (**self).to_data_value()
    }
}

/// File layout written by [`Serializer::serialize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `GEOMERGE` container with separate IPv4 and IPv6 node tables
    #[default]
    GeoMerge,
    /// MaxMind DB v2.0 with IPv4 under `::/96`
    Mmdb,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::GeoMerge => write!(f, "geomerge"),
            OutputFormat::Mmdb => write!(f, "mmdb"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geomerge" => Ok(OutputFormat::GeoMerge),
            "mmdb" => Ok(OutputFormat::Mmdb),
            _ => Err(format!("'{}' is not an output format (geomerge, mmdb)", s)),
        }
    }
}

/// Writes a [`TrieStore`] in the merged database format
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    database_type: Option<String>,
    description: BTreeMap<String, String>,
    build_epoch: Option<u64>,
    record_size: Option<RecordSize>,
    format: OutputFormat,
}

impl Serializer {
    /// Create a serializer with default metadata and automatic record size
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom database type name
    ///
    /// If not set, defaults to [`DEFAULT_DATABASE_TYPE`].
    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = Some(db_type.into());
        self
    }

    /// Add a description in a specific language
    ///
    /// Can be called multiple times for different languages. If never
    /// called, a default English description is written.
    pub fn with_description(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Record the build time (seconds since the Unix epoch)
    ///
    /// Without it the output depends only on the store contents.
    pub fn with_build_epoch(mut self, epoch: u64) -> Self {
        self.build_epoch = Some(epoch);
        self
    }

    /// Force a record size instead of the smallest one that fits
    pub fn with_record_size(mut self, record_size: RecordSize) -> Self {
        self.record_size = Some(record_size);
        self
    }

    /// Select the file layout
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Layout that [`Serializer::serialize`] writes
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write `store` to `sink`, returning the number of bytes written
    ///
    /// # Errors
    /// - [`MergeError::Io`] if the sink fails; the caller discards any partial output
    /// - [`MergeError::Format`] if the tables do not fit the record size or 4 GiB
    pub fn serialize<T: PoolValue, W: Write>(&self, store: &TrieStore<T>, sink: W) -> Result<u64> {
        match self.format {
            OutputFormat::GeoMerge => self.serialize_geomerge(store, sink),
            OutputFormat::Mmdb => self.serialize_mmdb(store, sink),
        }
    }

    fn serialize_geomerge<T: PoolValue, W: Write>(
        &self,
        store: &TrieStore<T>,
        mut sink: W,
    ) -> Result<u64> {
        let mut pool = DataEncoder::new();
        let v4_nodes = flatten(store.trie(AddressFamily::V4), &mut pool)?;
        let v6_nodes = flatten(store.trie(AddressFamily::V6), &mut pool)?;
        let pool = pool.into_bytes();

        let v4_count = node_count(&v4_nodes)?;
        let v6_count = node_count(&v6_nodes)?;
        let record_size = self.choose_record_size(v4_count, v6_count, pool.len())?;

        let mut v4_table = Vec::new();
        write_node_table(&v4_nodes, record_size, &mut v4_table)?;
        let mut v6_table = Vec::new();
        write_node_table(&v6_nodes, record_size, &mut v6_table)?;

        let metadata = self.metadata(store, record_size, v4_count, v6_count);
        let mut encoder = DataEncoder::plain();
        encoder.encode(&metadata)?;
        let metadata = encoder.into_bytes();

        let header = FileHeader::for_layout(&Layout {
            record_size,
            ipv4_node_count: v4_count,
            ipv6_node_count: v6_count,
            data_size: pool.len(),
            metadata_size: metadata.len(),
        })?;

        tracing::debug!(
            record_size = record_size.bits(),
            ipv4_nodes = v4_count,
            ipv6_nodes = v6_count,
            pool_bytes = pool.len(),
            metadata_bytes = metadata.len(),
            "serializing database"
        );

        for section in [
            header.as_bytes(),
            v4_table.as_slice(),
            v6_table.as_slice(),
            pool.as_slice(),
            metadata.as_slice(),
        ] {
            sink.write_all(section)?;
        }
        sink.flush()?;

        Ok(header.total_size.get() as u64)
    }

    /// Tree, 16 zero bytes, data section, metadata marker, metadata map
    fn serialize_mmdb<T: PoolValue, W: Write>(&self, store: &TrieStore<T>, mut sink: W) -> Result<u64> {
        let tree = ipv6_tree(store)?;
        let mut pool = DataEncoder::new();
        let nodes = flatten(&tree, &mut pool)?;
        let pool = pool.into_bytes();

        let count = node_count(&nodes)?;
        let record_size = self.choose_record_size(count, 0, pool.len())?;
        let mut tree_bytes = Vec::new();
        write_node_table(&nodes, record_size, &mut tree_bytes)?;

        let metadata = self.mmdb_metadata(record_size, count);
        let mut encoder = DataEncoder::plain();
        encoder.encode(&metadata)?;
        let metadata = encoder.into_bytes();

        tracing::debug!(
            record_size = record_size.bits(),
            nodes = count,
            networks = tree.len(),
            pool_bytes = pool.len(),
            metadata_bytes = metadata.len(),
            "serializing MaxMind DB"
        );

        let separator = [0u8; DATA_SECTION_SEPARATOR];
        let mut written = 0u64;
        for section in [
            tree_bytes.as_slice(),
            &separator[..],
            pool.as_slice(),
            METADATA_MARKER,
            metadata.as_slice(),
        ] {
            sink.write_all(section)?;
            written += section.len() as u64;
        }
        sink.flush()?;

        Ok(written)
    }

    fn choose_record_size(&self, v4_count: u32, v6_count: u32, pool_size: usize) -> Result<RecordSize> {
        let pool_size = u32::try_from(pool_size)
            .map_err(|_| MergeError::Format(format!("value pool of {} bytes exceeds 4 GiB", pool_size)))?;
        let needed = max_record_value(v4_count.max(v6_count), pool_size);

        match self.record_size {
            Some(size) if needed > size.max_value() => Err(MergeError::Format(format!(
                "{}-bit records cannot address {} nodes and {} pool bytes",
                size.bits(),
                v4_count.max(v6_count),
                pool_size
            ))),
            Some(size) => Ok(size),
            None => RecordSize::smallest_for(needed).ok_or_else(|| {
                MergeError::Format(format!("record value {} exceeds 32 bits", needed))
            }),
        }
    }

    fn metadata<T>(
        &self,
        store: &TrieStore<T>,
        record_size: RecordSize,
        v4_count: u32,
        v6_count: u32,
    ) -> DataValue {
        let mut metadata = self.descriptive_metadata();
        metadata.insert(
            meta::FORMAT_MAJOR.to_string(),
            DataValue::Uint16(crate::format::FORMAT_MAJOR),
        );
        metadata.insert(
            meta::FORMAT_MINOR.to_string(),
            DataValue::Uint16(crate::format::FORMAT_MINOR),
        );
        metadata.insert(
            meta::RECORD_SIZE.to_string(),
            DataValue::Uint16(record_size.bits()),
        );
        metadata.insert(meta::IPV4_NODE_COUNT.to_string(), DataValue::Uint32(v4_count));
        metadata.insert(meta::IPV6_NODE_COUNT.to_string(), DataValue::Uint32(v6_count));
        metadata.insert(
            meta::IPV4_NETWORK_COUNT.to_string(),
            DataValue::Uint64(store.trie(AddressFamily::V4).len() as u64),
        );
        metadata.insert(
            meta::IPV6_NETWORK_COUNT.to_string(),
            DataValue::Uint64(store.trie(AddressFamily::V6).len() as u64),
        );
        if let Some(epoch) = self.build_epoch {
            metadata.insert(meta::BUILD_EPOCH.to_string(), DataValue::Uint64(epoch));
        }

        DataValue::Map(metadata)
    }

    /// MaxMind metadata; readers require every key, so `build_epoch` is 0
    /// when unset
    fn mmdb_metadata(&self, record_size: RecordSize, node_count: u32) -> DataValue {
        let mut metadata = self.descriptive_metadata();
        metadata.insert(meta::FORMAT_MAJOR.to_string(), DataValue::Uint16(2));
        metadata.insert(meta::FORMAT_MINOR.to_string(), DataValue::Uint16(0));
        metadata.insert(
            meta::BUILD_EPOCH.to_string(),
            DataValue::Uint64(self.build_epoch.unwrap_or(0)),
        );
        metadata.insert("ip_version".to_string(), DataValue::Uint16(6));
        metadata.insert("node_count".to_string(), DataValue::Uint32(node_count));
        metadata.insert(
            meta::RECORD_SIZE.to_string(),
            DataValue::Uint16(record_size.bits()),
        );
        DataValue::Map(metadata)
    }

    /// `database_type`, `description` and `languages`
    fn descriptive_metadata(&self) -> BTreeMap<String, DataValue> {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            meta::DATABASE_TYPE.to_string(),
            DataValue::String(
                self.database_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DATABASE_TYPE.to_string()),
            ),
        );

        let description: BTreeMap<String, DataValue> = if self.description.is_empty() {
            BTreeMap::from([(
                "en".to_string(),
                DataValue::String(DEFAULT_DESCRIPTION.to_string()),
            )])
        } else {
            self.description
                .iter()
                .map(|(lang, text)| (lang.clone(), DataValue::String(text.clone())))
                .collect()
        };
        let languages = description
            .keys()
            .map(|lang| DataValue::String(lang.clone()))
            .collect();
        metadata.insert(meta::DESCRIPTION.to_string(), DataValue::Map(description));
        metadata.insert(meta::LANGUAGES.to_string(), DataValue::Array(languages));
        metadata
    }
}

/// Both families in one IPv6 trie, IPv4 placed under `::/96`
///
/// IPv4 goes in last, so it replaces an IPv6 record at the same position.
fn ipv6_tree<T>(store: &TrieStore<T>) -> Result<IpTrie<&T>> {
    let mut tree = IpTrie::new(AddressFamily::V6);
    for (network, record) in store.trie(AddressFamily::V6).iter() {
        tree.insert(&network, record)?;
    }
    for (network, record) in store.trie(AddressFamily::V4).iter() {
        tree.insert(&network.to_ipv6_compatible(), record)?;
    }
    Ok(tree)
}

fn node_count(nodes: &[[Slot; 2]]) -> Result<u32> {
    u32::try_from(nodes.len())
        .map_err(|_| MergeError::Format(format!("{} nodes exceed u32 range", nodes.len())))
}

/// Flatten one trie into node-table slots, encoding its records into `pool`
///
/// Node 0 is always the root. Leaves become data slots of their parent, so
/// the table holds only the trie's interior nodes.
pub fn flatten<T: PoolValue>(trie: &IpTrie<T>, pool: &mut DataEncoder) -> Result<Vec<[Slot; 2]>> {
    let mut nodes = Vec::new();
    emit(trie, ROOT, None, pool, &mut nodes)?;
    Ok(nodes)
}

fn emit<T: PoolValue>(
    trie: &IpTrie<T>,
    node: NodeId,
    inherited: Option<u32>,
    pool: &mut DataEncoder,
    nodes: &mut Vec<[Slot; 2]>,
) -> Result<u32> {
    let effective = match trie.record(node) {
        Some(record) => Some(pool.encode(&record.to_data_value())?),
        None => inherited,
    };

    let index = node_count(nodes)?;
    nodes.push([Slot::Empty, Slot::Empty]);

    for (side, child) in trie.children(node).into_iter().enumerate() {
        let slot = match child {
            None => effective.map_or(Slot::Empty, Slot::Data),
            Some(child) if trie.children(child) == [None, None] => match trie.record(child) {
                Some(record) => Slot::Data(pool.encode(&record.to_data_value())?),
                None => effective.map_or(Slot::Empty, Slot::Data),
            },
            Some(child) => Slot::Node(emit(trie, child, effective, pool, nodes)?),
        };
        nodes[index as usize][side] = slot;
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_table::{NodeTable, TreeWalk};

    fn net(s: &str) -> crate::network::Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_flatten_pushes_records_down() {
        let mut trie = IpTrie::new(AddressFamily::V4);
        trie.insert(&net("128.0.0.0/1"), DataValue::Uint32(1)).unwrap();
        trie.insert(&net("192.0.0.0/3"), DataValue::Uint32(2)).unwrap();

        let mut pool = DataEncoder::new();
        let nodes = flatten(&trie, &mut pool).unwrap();
        // root, 1, 11
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0][0], Slot::Empty);
        assert_eq!(nodes[0][1], Slot::Node(1));
        // 10 inherits the /1 record; 110 gets the /3 record, 111 inherits /1
        assert!(matches!(nodes[1][0], Slot::Data(_)));
        assert_eq!(nodes[1][1], Slot::Node(2));
        assert_ne!(nodes[2][0], nodes[2][1]);
        assert_eq!(nodes[1][0], nodes[2][1]);
    }

    #[test]
    fn test_empty_store() {
        let store: TrieStore<DataValue> = TrieStore::new();
        let mut out = Vec::new();
        let written = Serializer::new().serialize(&store, &mut out).unwrap();
        assert_eq!(written as usize, out.len());

        let header = FileHeader::parse(&out).unwrap();
        assert_eq!(header.ipv4_node_count.get(), 1);
        assert_eq!(header.data_size.get(), 0);
    }

    #[test]
    fn test_default_route_record() {
        let mut store = TrieStore::new();
        store.insert(&net("0.0.0.0/0"), DataValue::Uint32(9)).unwrap();
        let mut out = Vec::new();
        Serializer::new().serialize(&store, &mut out).unwrap();

        let header = FileHeader::parse(&out).unwrap();
        let table = NodeTable::new(
            &out[header.ipv4_nodes_offset.get() as usize..],
            header.ipv4_node_count.get(),
            RecordSize::Bits24,
        )
        .unwrap();
        assert_eq!(
            table.walk(0xC000_0201u128 << 96, 0, 32).unwrap(),
            TreeWalk::Data { offset: 0, depth: 1 }
        );
    }

    #[test]
    fn test_deterministic_without_epoch() {
        let mut store = TrieStore::new();
        store.insert(&net("192.0.2.0/24"), DataValue::String("doc".into())).unwrap();
        store.insert(&net("2001:db8::/32"), DataValue::String("doc6".into())).unwrap();

        let mut first = Vec::new();
        let mut second = Vec::new();
        Serializer::new().serialize(&store, &mut first).unwrap();
        Serializer::new().serialize(&store, &mut second).unwrap();
        assert_eq!(first, second);

        let mut stamped = Vec::new();
        Serializer::new()
            .with_build_epoch(1_700_000_000)
            .serialize(&store, &mut stamped)
            .unwrap();
        assert_ne!(first, stamped);
    }

    #[test]
    fn test_forced_record_size() {
        let mut store = TrieStore::new();
        store.insert(&net("192.0.2.0/24"), DataValue::Uint32(1)).unwrap();
        let mut out = Vec::new();
        Serializer::new()
            .with_record_size(RecordSize::Bits32)
            .serialize(&store, &mut out)
            .unwrap();
        let header = FileHeader::parse(&out).unwrap();
        assert_eq!(header.record_size().unwrap(), RecordSize::Bits32);
    }

    #[test]
    fn test_mmdb_output_opens_with_maxmind_reader() {
        use crate::mmdb::{IpVersion, MmdbReader};

        let mut store = TrieStore::new();
        store.insert(&net("203.0.113.0/24"), DataValue::String("net".into())).unwrap();
        store.insert(&net("203.0.113.128/25"), DataValue::String("sub".into())).unwrap();
        store.insert(&net("2001:db8::/32"), DataValue::String("doc6".into())).unwrap();

        let mut out = Vec::new();
        let written = Serializer::new()
            .with_format(OutputFormat::Mmdb)
            .with_database_type("GeoMerge-Test")
            .serialize(&store, &mut out)
            .unwrap();
        assert_eq!(written as usize, out.len());
        assert!(FileHeader::parse(&out).is_err());

        let reader = MmdbReader::from_bytes(out).unwrap();
        assert_eq!(reader.header().ip_version, IpVersion::V6);
        assert_eq!(reader.database_type().as_deref(), Some("GeoMerge-Test"));

        let lookup = |addr: &str| reader.lookup(addr.parse().unwrap()).unwrap();
        assert_eq!(lookup("203.0.113.200"), Some((DataValue::String("sub".into()), 25)));
        assert_eq!(lookup("203.0.113.10").map(|(v, _)| v), Some(DataValue::String("net".into())));
        assert_eq!(lookup("2001:db8:1::1"), Some((DataValue::String("doc6".into()), 32)));
        assert_eq!(lookup("198.51.100.1"), None);
        assert_eq!(lookup("2001:db9::1"), None);

        let metadata = reader.metadata().unwrap();
        assert_eq!(
            metadata.get(meta::FORMAT_MAJOR),
            Some(&DataValue::Uint16(2))
        );
        assert_eq!(metadata.get(meta::BUILD_EPOCH), Some(&DataValue::Uint64(0)));
        assert_eq!(
            metadata.get("node_count").and_then(DataValue::as_u64),
            Some(reader.header().node_count as u64)
        );
    }

    #[test]
    fn test_mmdb_ipv4_wins_at_shared_position() {
        use crate::mmdb::MmdbReader;
        use crate::point_lookup::PointLookup;

        let mut store = TrieStore::new();
        store.insert(&net("::/96"), DataValue::Uint32(6)).unwrap();
        store.insert(&net("0.0.0.0/0"), DataValue::Uint32(4)).unwrap();

        let mut out = Vec::new();
        Serializer::new()
            .with_format(OutputFormat::Mmdb)
            .serialize(&store, &mut out)
            .unwrap();
        let reader = MmdbReader::from_bytes(out).unwrap();
        assert_eq!(
            reader.query("8.8.8.8".parse().unwrap()).unwrap(),
            Some(DataValue::Uint32(4))
        );
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("mmdb".parse::<OutputFormat>(), Ok(OutputFormat::Mmdb));
        assert_eq!("GeoMerge".parse::<OutputFormat>(), Ok(OutputFormat::GeoMerge));
        assert!("csv".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default().to_string(), "geomerge");
    }

    #[test]
    fn test_sink_failure_is_io() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let store: TrieStore<DataValue> = TrieStore::new();
        assert!(matches!(
            Serializer::new().serialize(&store, Full),
            Err(MergeError::Io(_))
        ));
    }
}
