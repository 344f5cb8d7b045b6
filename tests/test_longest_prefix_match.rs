//! Longest-prefix match across nested registry ranges
//!
//! A /25 carved out of a /24 must win for addresses it covers regardless of
//! the order the two ranges arrive in, both in the in-memory store and in the
//! serialized database.

mod common;

use geomerge::{
    AttributeRecord, BuildOptions, Database, Enricher, MmdbReader, Network, NetworkBuilder,
    Pipeline, RangeRecord, Serializer, TrieStore,
};
use std::net::IpAddr;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn nested_ranges(parent_first: bool) -> Vec<RangeRecord> {
    let parent = RangeRecord::new(
        "203.0.113.0",
        4,
        24,
        "EXAMPLE-NET",
        Some("MNT-EXAMPLE".to_string()),
    );
    let child = RangeRecord::new("203.0.113.128", 4, 25, "EXAMPLE-SUB", None);
    if parent_first {
        vec![parent, child]
    } else {
        vec![child, parent]
    }
}

fn build_store(parent_first: bool) -> TrieStore {
    let asn = MmdbReader::from_bytes(common::asn_fixture()).unwrap();
    let city = MmdbReader::from_bytes(common::city_fixture()).unwrap();
    let enricher = Enricher::new(&asn, &city);
    let source = nested_ranges(parent_first)
        .into_iter()
        .map(Ok::<_, geomerge::MergeError>);
    Pipeline::new(NetworkBuilder::new(), enricher, BuildOptions::default())
        .run(source)
        .unwrap()
        .store
}

fn check_record(record: &AttributeRecord, expect_sub: bool) {
    if expect_sub {
        assert_eq!(record.netname(), "EXAMPLE-SUB");
        assert_eq!(record.maintainer(), "Unknown");
        assert_eq!(record.subnet(), "203.0.113.128/25");
        assert_eq!(record.country_iso_code(), Some("CA"));
        assert_eq!(record.city_name(), Some("Toronto"));
    } else {
        assert_eq!(record.netname(), "EXAMPLE-NET");
        assert_eq!(record.maintainer(), "MNT-EXAMPLE");
        assert_eq!(record.subnet(), "203.0.113.0/24");
        assert_eq!(record.country_iso_code(), Some("US"));
        assert_eq!(record.country_name(), Some("United States"));
    }
    // Both ranges sit inside the same AS
    assert_eq!(record.asn_number(), Some(64496));
    assert_eq!(record.asn_name(), Some("Example Transit"));
}

#[test]
fn test_nested_ranges_in_memory() {
    for parent_first in [true, false] {
        let store = build_store(parent_first);
        assert_eq!(store.len(), 2);

        let (network, record) = store.lookup(ip("203.0.113.10")).expect("covered by /24");
        assert_eq!(network, "203.0.113.0/24".parse::<Network>().unwrap());
        check_record(record, false);

        let (network, record) = store.lookup(ip("203.0.113.200")).expect("covered by /25");
        assert_eq!(network.prefix_len(), 25);
        check_record(record, true);

        assert!(
            store.lookup(ip("203.0.114.1")).is_none(),
            "address outside both ranges should not match"
        );
    }
}

#[test]
fn test_nested_ranges_serialized() {
    for parent_first in [true, false] {
        let store = build_store(parent_first);
        let mut bytes = Vec::new();
        Serializer::new().serialize(&store, &mut bytes).unwrap();
        let db = Database::from_bytes(bytes).unwrap();

        // Boundaries of the lower half answer with the /24
        for addr in ["203.0.113.0", "203.0.113.10", "203.0.113.127"] {
            let result = db.lookup_str(addr).unwrap().expect("covered by /24");
            check_record(&result.record, false);
        }
        // Boundaries of the upper half answer with the /25
        for addr in ["203.0.113.128", "203.0.113.200", "203.0.113.255"] {
            let result = db.lookup_str(addr).unwrap().expect("covered by /25");
            check_record(&result.record, true);
            assert_eq!(result.prefix_len, 25);
            assert_eq!(result.network.to_string(), "203.0.113.128/25");
        }

        assert!(db.lookup_str("203.0.112.255").unwrap().is_none());
        assert!(db.lookup_str("203.0.114.0").unwrap().is_none());
    }
}

#[test]
fn test_insertion_order_gives_identical_files() {
    let serialize = |store: &TrieStore| {
        let mut bytes = Vec::new();
        Serializer::new().serialize(store, &mut bytes).unwrap();
        bytes
    };
    assert_eq!(
        serialize(&build_store(true)),
        serialize(&build_store(false)),
        "insertion order should not change the output"
    );
}

#[test]
fn test_host_routes_and_default_route() {
    let mut store = TrieStore::new();
    let default: Network = "0.0.0.0/0".parse().unwrap();
    let host: Network = "198.51.100.7/32".parse().unwrap();
    let v6_host: Network = "2001:db8::1/128".parse().unwrap();
    store
        .insert(&default, AttributeRecord::new(&default, "DEFAULT", None))
        .unwrap();
    store
        .insert(&host, AttributeRecord::new(&host, "HOST", None))
        .unwrap();
    store
        .insert(&v6_host, AttributeRecord::new(&v6_host, "HOST-V6", None))
        .unwrap();

    let mut bytes = Vec::new();
    Serializer::new().serialize(&store, &mut bytes).unwrap();
    let db = Database::from_bytes(bytes).unwrap();

    let result = db.lookup_str("198.51.100.7").unwrap().unwrap();
    assert_eq!(result.record.netname(), "HOST");
    assert_eq!(result.prefix_len, 32);

    assert_eq!(
        db.lookup_str("198.51.100.6").unwrap().unwrap().record.netname(),
        "DEFAULT"
    );
    assert_eq!(
        db.lookup_str("8.8.8.8").unwrap().unwrap().record.netname(),
        "DEFAULT"
    );

    let result = db.lookup_str("2001:db8::1").unwrap().unwrap();
    assert_eq!(result.record.netname(), "HOST-V6");
    assert_eq!(result.prefix_len, 128);
    // The IPv4 default route does not leak into the IPv6 table
    assert!(db.lookup_str("2001:db8::2").unwrap().is_none());
}
