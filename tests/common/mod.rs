//! Shared fixtures for integration tests
#![allow(dead_code)]

use geomerge::data_section::DataEncoder;
use geomerge::mmdb::{DATA_SECTION_SEPARATOR, METADATA_MARKER};
use geomerge::node_table::{max_record_value, write_node_table, RecordSize};
use geomerge::serializer::flatten;
use geomerge::{AddressFamily, DataValue, IpTrie, Network};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Build a map value from string keys
pub fn map(entries: Vec<(&str, DataValue)>) -> DataValue {
    DataValue::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn string(s: &str) -> DataValue {
    DataValue::String(s.to_string())
}

/// Record shaped like GeoLite2-ASN
pub fn asn_value(number: u32, organization: &str) -> DataValue {
    map(vec![
        ("autonomous_system_number", DataValue::Uint32(number)),
        ("autonomous_system_organization", string(organization)),
    ])
}

/// Record shaped like GeoLite2-City
pub fn city_value(city: &str, country: &str, iso_code: &str) -> DataValue {
    map(vec![
        (
            "city",
            map(vec![
                ("geoname_id", DataValue::Uint32(4_409_896)),
                ("names", map(vec![("en", string(city)), ("de", string(city))])),
            ]),
        ),
        (
            "country",
            map(vec![
                ("iso_code", string(iso_code)),
                ("names", map(vec![("en", string(country))])),
            ]),
        ),
        (
            "location",
            map(vec![
                ("latitude", DataValue::Double(37.2)),
                ("longitude", DataValue::Double(-93.3)),
            ]),
        ),
    ])
}

/// Build a MaxMind DB file in memory
///
/// With `ip_version` 6, IPv4 networks are placed under `::/96` the way
/// GeoLite2 files store them.
pub fn mmdb_fixture(entries: &[(&str, DataValue)], ip_version: u8, database_type: &str) -> Vec<u8> {
    let family = if ip_version == 6 {
        AddressFamily::V6
    } else {
        AddressFamily::V4
    };
    let mut trie = IpTrie::new(family);
    for (cidr, value) in entries {
        let network: Network = cidr.parse().unwrap();
        let network = match (family, network.base()) {
            (AddressFamily::V6, IpAddr::V4(v4)) => Network::new(
                IpAddr::V6(v4.to_ipv6_compatible()),
                network.prefix_len() + 96,
            )
            .unwrap(),
            _ => network,
        };
        trie.insert(&network, value.clone()).unwrap();
    }

    let mut pool = DataEncoder::new();
    let nodes = flatten(&trie, &mut pool).unwrap();
    let pool = pool.into_bytes();
    let node_count = nodes.len() as u32;
    let record_size =
        RecordSize::smallest_for(max_record_value(node_count, pool.len() as u32)).unwrap();

    let mut file = Vec::new();
    write_node_table(&nodes, record_size, &mut file).unwrap();
    file.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR]);
    file.extend_from_slice(&pool);
    file.extend_from_slice(METADATA_MARKER);

    let metadata = map(vec![
        ("binary_format_major_version", DataValue::Uint16(2)),
        ("binary_format_minor_version", DataValue::Uint16(0)),
        ("build_epoch", DataValue::Uint64(1_700_000_000)),
        ("database_type", string(database_type)),
        ("ip_version", DataValue::Uint16(ip_version as u16)),
        ("languages", DataValue::Array(vec![string("en")])),
        ("node_count", DataValue::Uint32(node_count)),
        ("record_size", DataValue::Uint16(record_size.bits())),
    ]);
    let mut encoder = DataEncoder::plain();
    encoder.encode(&metadata).unwrap();
    file.extend_from_slice(&encoder.into_bytes());
    file
}

/// ASN database covering the documentation ranges
pub fn asn_fixture() -> Vec<u8> {
    mmdb_fixture(
        &[
            ("203.0.113.0/24", asn_value(64496, "Example Transit")),
            ("198.51.100.0/24", asn_value(64497, "Example Hosting")),
            ("2001:db8::/32", asn_value(64498, "Example IPv6")),
        ],
        6,
        "GeoLite2-ASN",
    )
}

/// City database: the /24 is in the US, its upper /25 in Canada
pub fn city_fixture() -> Vec<u8> {
    mmdb_fixture(
        &[
            ("203.0.113.0/24", city_value("Springfield", "United States", "US")),
            ("203.0.113.128/25", city_value("Toronto", "Canada", "CA")),
            ("2001:db8::/32", city_value("Berlin", "Germany", "DE")),
        ],
        6,
        "GeoLite2-City",
    )
}

/// Ranges CSV in the registry export layout
pub const RANGES_CSV: &str = "\
first_ip,ip_version,subnet,netname,mnt_by
10.0.0.5,4,8,PRIVATE-NET,MNT-PRIV
198.51.100.0,4,33,BAD-PREFIX,
203.0.113.0,4,24,EXAMPLE-NET,MNT-EXAMPLE
203.0.113.128,4,25,EXAMPLE-SUB,
2001:db8::,6,32,DOC-V6,MNT-DOC
";
