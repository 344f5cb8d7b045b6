//! Network definitions and validation of raw range records
//!
//! Registry dumps routinely supply a "first IP" that is not aligned to the
//! announced prefix, so every [`Network`] is built by re-applying the prefix
//! mask. The stored base address never carries host bits.

use crate::error::{MergeError, Result};
use crate::record::RangeRecord;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    /// IPv4 (32-bit addresses)
    V4,
    /// IPv6 (128-bit addresses)
    V6,
}

impl AddressFamily {
    /// Map a registry `ip_version` column (4 or 6) to a family
    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            4 => Some(AddressFamily::V4),
            6 => Some(AddressFamily::V6),
            _ => None,
        }
    }

    /// Family of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Number of address bits (maximum prefix length)
    pub fn bit_width(self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }

    /// Version number as used by registry exports (4 or 6)
    pub fn version(self) -> u8 {
        match self {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// A canonical network: base address with host bits cleared plus prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Network {
    base: IpAddr,
    prefix_len: u8,
}

impl Network {
    /// Create a network, clearing any host bits of `addr`
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let family = AddressFamily::of(&addr);
        if prefix_len > family.bit_width() {
            return Err(MergeError::InvalidPrefix {
                prefix_len: prefix_len as i64,
                family,
            });
        }
        let key = address_key(addr) & prefix_mask(prefix_len, family);
        Ok(Self::from_key(family, key, prefix_len))
    }

    /// Rebuild a network from left-aligned key bits (trie traversal)
    pub(crate) fn from_key(family: AddressFamily, key: u128, prefix_len: u8) -> Self {
        Self {
            base: key_to_address(family, key),
            prefix_len,
        }
    }

    /// Network base address (all host bits zero)
    pub fn base(&self) -> IpAddr {
        self.base
    }

    /// Prefix length in bits
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Address family of the network
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.base)
    }

    /// Left-aligned key bits of the base address
    pub(crate) fn key(&self) -> u128 {
        address_key(self.base)
    }

    /// Position of the network in a MaxMind IPv6 tree
    ///
    /// IPv4 networks move under `::/96` (`192.0.2.0/24` becomes
    /// `::c000:200/120`). IPv6 networks are returned unchanged.
    pub fn to_ipv6_compatible(&self) -> Network {
        match self.base {
            IpAddr::V4(v4) => Network {
                base: IpAddr::V6(v4.to_ipv6_compatible()),
                prefix_len: self.prefix_len + 96,
            },
            IpAddr::V6(_) => *self,
        }
    }

    /// True if `addr` is inside this network
    pub fn contains(&self, addr: IpAddr) -> bool {
        let family = self.family();
        if AddressFamily::of(&addr) != family {
            return false;
        }
        address_key(addr) & prefix_mask(self.prefix_len, family) == self.key()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix_len)
    }
}

impl FromStr for Network {
    type Err = MergeError;

    /// Parse CIDR notation (`203.0.113.0/24`). A bare address is a host route.
    fn from_str(s: &str) -> Result<Self> {
        let (addr_str, prefix_str) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr_str
            .trim()
            .parse()
            .map_err(|_| MergeError::InvalidAddress(format!("'{}' is not an IP address", s)))?;
        let family = AddressFamily::of(&addr);
        let prefix_len = match prefix_str {
            Some(p) => p.trim().parse::<i64>().map_err(|_| {
                MergeError::InvalidAddress(format!("'{}' has a non-numeric prefix", s))
            })?,
            None => family.bit_width() as i64,
        };
        if !(0..=family.bit_width() as i64).contains(&prefix_len) {
            return Err(MergeError::InvalidPrefix { prefix_len, family });
        }
        Network::new(addr, prefix_len as u8)
    }
}

/// Validates raw range records and turns them into canonical networks
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkBuilder {
    allow_private: bool,
}

impl NetworkBuilder {
    /// Create a builder that rejects private/reserved addresses
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept private, loopback and link-local addresses instead of rejecting them
    pub fn allow_private(mut self, allow: bool) -> Self {
        self.allow_private = allow;
        self
    }

    /// Validate and canonicalize one range
    ///
    /// # Errors
    /// - [`MergeError::InvalidAddress`] if `address` does not parse, or does not
    ///   belong to `family`
    /// - [`MergeError::ReservedOrPrivate`] for private/loopback/link-local space
    /// - [`MergeError::InvalidPrefix`] if `prefix_len` is out of range
    pub fn build(&self, address: &str, prefix_len: i64, family: u8) -> Result<Network> {
        let family = AddressFamily::from_version(family).ok_or_else(|| {
            MergeError::InvalidAddress(format!(
                "unknown address family {} for '{}'",
                family, address
            ))
        })?;

        let addr: IpAddr = address.trim().parse().map_err(|_| {
            MergeError::InvalidAddress(format!("'{}' is not an IP address", address))
        })?;

        if AddressFamily::of(&addr) != family {
            return Err(MergeError::InvalidAddress(format!(
                "'{}' is not an {} address",
                address, family
            )));
        }

        if !self.allow_private && is_reserved_or_private(addr) {
            return Err(MergeError::ReservedOrPrivate(addr));
        }

        if !(0..=family.bit_width() as i64).contains(&prefix_len) {
            return Err(MergeError::InvalidPrefix { prefix_len, family });
        }

        Network::new(addr, prefix_len as u8)
    }

    /// Validate a [`RangeRecord`] as produced by a range source
    pub fn build_record(&self, record: &RangeRecord) -> Result<Network> {
        self.build(&record.first_ip, record.prefix_len, record.ip_version)
    }
}

/// True for private (RFC 1918 / unique-local), loopback and link-local addresses
///
/// IPv4-mapped IPv6 addresses are judged by their embedded IPv4 address.
pub fn is_reserved_or_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_reserved_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_reserved_v4(v4),
            None => is_reserved_v6(v6),
        },
    }
}

fn is_reserved_v4(addr: Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback() || addr.is_link_local()
}

fn is_reserved_v6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local
    addr.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Left-aligned 128-bit key: IPv4 occupies the top 32 bits
pub(crate) fn address_key(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => (u32::from(v4) as u128) << 96,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn key_to_address(family: AddressFamily, key: u128) -> IpAddr {
    match family {
        AddressFamily::V4 => IpAddr::V4(Ipv4Addr::from((key >> 96) as u32)),
        AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(key)),
    }
}

/// Mask keeping the first `prefix_len` bits of a left-aligned key
pub(crate) fn prefix_mask(prefix_len: u8, family: AddressFamily) -> u128 {
    let width_mask = match family {
        AddressFamily::V4 => !0u128 << 96,
        AddressFamily::V6 => !0u128,
    };
    if prefix_len == 0 {
        0
    } else {
        (!0u128 << (128 - prefix_len as u32)) & width_mask
    }
}

/// Bit of a left-aligned key at `depth` (0 = most significant)
#[inline]
pub(crate) fn bit_at(key: u128, depth: u8) -> usize {
    ((key >> (127 - depth as u32)) & 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_bits_are_cleared() {
        let builder = NetworkBuilder::new();
        let net = builder.build("203.0.113.77", 24, 4).unwrap();
        assert_eq!(net.base(), "203.0.113.0".parse::<IpAddr>().unwrap());
        assert_eq!(net.prefix_len(), 24);
        assert_eq!(net.to_string(), "203.0.113.0/24");
    }

    #[test]
    fn test_build_is_idempotent() {
        let builder = NetworkBuilder::new();
        let first = builder.build("2001:db8:abcd:1234::99", 48, 6).unwrap();
        let again = builder
            .build(&first.base().to_string(), first.prefix_len() as i64, 6)
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(first.to_string(), "2001:db8:abcd::/48");
    }

    #[test]
    fn test_zero_and_full_prefix() {
        let builder = NetworkBuilder::new();
        let all = builder.build("8.8.8.8", 0, 4).unwrap();
        assert_eq!(all.to_string(), "0.0.0.0/0");
        let host = builder.build("8.8.8.8", 32, 4).unwrap();
        assert_eq!(host.to_string(), "8.8.8.8/32");
        let v6_host = builder.build("2001:db8::1", 128, 6).unwrap();
        assert_eq!(v6_host.to_string(), "2001:db8::1/128");
    }

    #[test]
    fn test_invalid_prefix() {
        let builder = NetworkBuilder::new();
        assert_eq!(
            builder.build("203.0.113.0", 33, 4),
            Err(MergeError::InvalidPrefix {
                prefix_len: 33,
                family: AddressFamily::V4
            })
        );
        assert!(matches!(
            builder.build("203.0.113.0", -1, 4),
            Err(MergeError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            builder.build("2001:db8::", 129, 6),
            Err(MergeError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn test_invalid_address() {
        let builder = NetworkBuilder::new();
        assert!(matches!(
            builder.build("not-an-ip", 24, 4),
            Err(MergeError::InvalidAddress(_))
        ));
        assert!(matches!(
            builder.build("203.0.113.0", 24, 6),
            Err(MergeError::InvalidAddress(_))
        ));
        assert!(matches!(
            builder.build("203.0.113.0", 24, 5),
            Err(MergeError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_private_addresses_rejected() {
        let builder = NetworkBuilder::new();
        for (addr, family) in [
            ("10.0.0.5", 4),
            ("172.16.4.0", 4),
            ("192.168.1.0", 4),
            ("127.0.0.1", 4),
            ("169.254.10.0", 4),
            ("::1", 6),
            ("fd00::", 6),
            ("fe80::1", 6),
            ("::ffff:10.1.2.3", 6),
        ] {
            assert!(
                matches!(
                    builder.build(addr, 24, family),
                    Err(MergeError::ReservedOrPrivate(_))
                ),
                "{} should be rejected",
                addr
            );
        }
    }

    #[test]
    fn test_documentation_ranges_are_not_private() {
        let builder = NetworkBuilder::new();
        assert!(builder.build("203.0.113.0", 24, 4).is_ok());
        assert!(builder.build("2001:db8::", 32, 6).is_ok());
    }

    #[test]
    fn test_allow_private() {
        let builder = NetworkBuilder::new().allow_private(true);
        let net = builder.build("10.1.2.3", 8, 4).unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_ipv6_compatible() {
        let net: Network = "192.0.2.0/24".parse().unwrap();
        let mapped = net.to_ipv6_compatible();
        assert_eq!(
            mapped.base(),
            IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0xc000, 0x0200))
        );
        assert_eq!(mapped.prefix_len(), 120);
        let net: Network = "0.0.0.0/0".parse().unwrap();
        assert_eq!(net.to_ipv6_compatible().to_string(), "::/96");
        let net: Network = "2001:db8::/32".parse().unwrap();
        assert_eq!(net.to_ipv6_compatible(), net);
    }

    #[test]
    fn test_contains() {
        let net: Network = "203.0.113.128/25".parse().unwrap();
        assert!(net.contains("203.0.113.200".parse().unwrap()));
        assert!(!net.contains("203.0.113.10".parse().unwrap()));
        assert!(!net.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_parse_network() {
        let net: Network = "192.0.2.9/24".parse().unwrap();
        assert_eq!(net.to_string(), "192.0.2.0/24");
        let host: Network = "2001:db8::5".parse().unwrap();
        assert_eq!(host.prefix_len(), 128);
        assert!("192.0.2.0/40".parse::<Network>().is_err());
    }

    #[test]
    fn test_bit_at() {
        let key = address_key("128.0.0.1".parse().unwrap());
        assert_eq!(bit_at(key, 0), 1);
        assert_eq!(bit_at(key, 1), 0);
        assert_eq!(bit_at(key, 31), 1);
    }
}
