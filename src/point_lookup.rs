//! Point-lookup sources used for enrichment
//!
//! A [`PointLookup`] answers "which record covers this address?" for a single
//! address. The ASN and city databases are the production implementations;
//! [`StaticLookup`] and [`NoLookup`] cover tests and builds without one of
//! the databases.

use crate::data_section::DataValue;
use crate::network::Network;
use crate::trie::TrieStore;
use std::fmt;
use std::net::IpAddr;

/// Structural failure of a lookup source (corrupt file, bad pointer, ...)
///
/// "No data for this address" is not an error: it is `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupError(pub String);

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for LookupError {}

/// Read-only single-address lookup
///
/// Implementations must be safe to query from several threads at once.
pub trait PointLookup: Sync {
    /// Record covering `addr`, if any
    fn query(&self, addr: IpAddr) -> Result<Option<DataValue>, LookupError>;
}

impl<T: PointLookup + ?Sized> PointLookup for Box<T> {
    fn query(&self, addr: IpAddr) -> Result<Option<DataValue>, LookupError> {
        (**self).query(addr)
    }
}

impl<T: PointLookup + ?Sized> PointLookup for &T {
    fn query(&self, addr: IpAddr) -> Result<Option<DataValue>, LookupError> {
        (**self).query(addr)
    }
}

/// Lookup source that never has data
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl PointLookup for NoLookup {
    fn query(&self, _addr: IpAddr) -> Result<Option<DataValue>, LookupError> {
        Ok(None)
    }
}

/// In-memory lookup source built from `(network, value)` pairs
///
/// Longest prefix wins, like the on-disk databases.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    entries: TrieStore<DataValue>,
}

impl StaticLookup {
    /// Create an empty lookup
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any value already stored for `network`
    pub fn with(mut self, network: Network, value: DataValue) -> Self {
        self.insert(network, value);
        self
    }

    /// Add an entry, replacing any value already stored for `network`
    pub fn insert(&mut self, network: Network, value: DataValue) {
        // The store dispatches on family, so this cannot conflict
        let _ = self.entries.insert(&network, value);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PointLookup for StaticLookup {
    fn query(&self, addr: IpAddr) -> Result<Option<DataValue>, LookupError> {
        Ok(self.entries.lookup(addr).map(|(_, value)| value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_lookup() {
        let lookup = StaticLookup::new()
            .with("192.0.2.0/24".parse().unwrap(), DataValue::Uint32(1))
            .with("192.0.2.0/28".parse().unwrap(), DataValue::Uint32(2));

        assert_eq!(
            lookup.query("192.0.2.3".parse().unwrap()).unwrap(),
            Some(DataValue::Uint32(2))
        );
        assert_eq!(
            lookup.query("192.0.2.200".parse().unwrap()).unwrap(),
            Some(DataValue::Uint32(1))
        );
        assert_eq!(lookup.query("192.0.3.1".parse().unwrap()).unwrap(), None);
        assert_eq!(lookup.len(), 2);
    }

    #[test]
    fn test_boxed_lookup() {
        let boxed: Box<dyn PointLookup> = Box::new(NoLookup);
        assert_eq!(boxed.query("8.8.8.8".parse().unwrap()).unwrap(), None);
    }
}
