//! Read-only MaxMind DB lookups

use super::format::{read_metadata, MmdbHeader};
use super::types::{IpVersion, MmdbError};
use crate::data_section::{DataDecoder, DataValue};
use crate::database::Storage;
use crate::network::address_key;
use crate::node_table::{NodeTable, TreeWalk};
use crate::point_lookup::{LookupError, PointLookup};
use std::net::IpAddr;
use std::path::Path;

/// Where IPv4 lookups begin in the search tree
#[derive(Debug, Clone, Copy)]
enum Ipv4Start {
    /// Continue at this node with the 32 address bits
    Node(u32),
    /// Everything below ::/96 resolves to one outcome
    Resolved(Option<u32>),
    /// IPv4-only tree, start at the root
    Root,
}

/// A MaxMind DB file (GeoLite2 ASN, GeoLite2 City, ...)
pub struct MmdbReader {
    data: Storage,
    header: MmdbHeader,
    ipv4_start: Ipv4Start,
}

impl MmdbReader {
    /// Open a database file using memory mapping
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MmdbError> {
        let storage = Storage::map(path.as_ref())
            .map_err(|e| MmdbError::IoError(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_storage(storage)
    }

    /// Create a reader over an in-memory file
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, MmdbError> {
        Self::from_storage(Storage::Owned(data))
    }

    fn from_storage(data: Storage) -> Result<Self, MmdbError> {
        let header = MmdbHeader::from_file(data.as_slice())?;
        let tree = NodeTable::new(data.as_slice(), header.node_count, header.record_size)?;

        // IPv4 lives under ::/96 in IPv6 trees; resolve that path once
        let ipv4_start = match header.ip_version {
            IpVersion::V4 => Ipv4Start::Root,
            IpVersion::V6 => match tree.walk(0, 0, 96)? {
                TreeWalk::Node(node) => Ipv4Start::Node(node),
                TreeWalk::Data { offset, .. } => Ipv4Start::Resolved(Some(offset)),
                TreeWalk::NotFound { .. } => Ipv4Start::Resolved(None),
            },
        };

        Ok(Self {
            data,
            header,
            ipv4_start,
        })
    }

    /// Layout information
    pub fn header(&self) -> &MmdbHeader {
        &self.header
    }

    /// Full metadata map
    pub fn metadata(&self) -> Result<DataValue, MmdbError> {
        read_metadata(self.data.as_slice())
    }

    /// `database_type` from the metadata, if present
    pub fn database_type(&self) -> Option<String> {
        self.metadata()
            .ok()?
            .get("database_type")
            .and_then(DataValue::as_str)
            .map(str::to_string)
    }

    /// Record covering `addr` with the prefix length of the match
    ///
    /// IPv6 addresses have no data in IPv4-only files.
    pub fn lookup(&self, addr: IpAddr) -> Result<Option<(DataValue, u8)>, MmdbError> {
        let tree = NodeTable::new(
            self.data.as_slice(),
            self.header.node_count,
            self.header.record_size,
        )?;
        let key = address_key(addr);

        let walk = match (addr, self.ipv4_start) {
            (IpAddr::V6(_), Ipv4Start::Root) => return Ok(None),
            (IpAddr::V6(_), _) => tree.walk(key, 0, 128)?,
            (IpAddr::V4(_), Ipv4Start::Root) => tree.walk(key, 0, 32)?,
            (IpAddr::V4(_), Ipv4Start::Node(node)) => tree.walk(key, node, 32)?,
            (IpAddr::V4(_), Ipv4Start::Resolved(None)) => return Ok(None),
            (IpAddr::V4(_), Ipv4Start::Resolved(Some(offset))) => {
                return Ok(Some((self.resolve(offset)?, 0)));
            }
        };

        match walk {
            TreeWalk::Data { offset, depth } => Ok(Some((self.resolve(offset)?, depth))),
            TreeWalk::NotFound { .. } => Ok(None),
            TreeWalk::Node(node) => Err(MmdbError::InvalidFormat(format!(
                "search tree deeper than the address at node {}",
                node
            ))),
        }
    }

    fn resolve(&self, offset: u32) -> Result<DataValue, MmdbError> {
        let section = &self.data.as_slice()[self.header.data_start..self.header.data_end];
        DataDecoder::new(section)
            .decode(offset)
            .map_err(|e| MmdbError::DecodeError(e.to_string()))
    }
}

impl PointLookup for MmdbReader {
    fn query(&self, addr: IpAddr) -> Result<Option<DataValue>, LookupError> {
        Ok(self.lookup(addr)?.map(|(value, _)| value))
    }
}
