//! Range records (input) and attribute records (output)

use crate::data_section::DataValue;
use crate::error::{MergeError, Result};
use crate::network::Network;
use serde::Serialize;
use std::collections::BTreeMap;

/// Maintainer value used when the registry entry has none
pub const UNKNOWN_MAINTAINER: &str = "Unknown";

/// Keys of the persisted record map
pub mod keys {
    /// Autonomous system number (uint32)
    pub const ASN_NUMBER: &str = "asn_number";
    /// Autonomous system organization
    pub const ASN_NAME: &str = "asn_name";
    /// Registry maintainer (`mnt-by`)
    pub const MAINTAINER: &str = "mnt_by";
    /// Registry network name
    pub const NETNAME: &str = "netname";
    /// `<address>/<prefix>` of the registry range
    pub const SUBNET: &str = "subnet";
    /// English city name
    pub const CITY_NAME: &str = "city_name";
    /// English country name
    pub const COUNTRY_NAME: &str = "country_name";
    /// ISO 3166-1 alpha-2 country code
    pub const ISO_CODE: &str = "iso_code";
}

/// Attributes a range carries from the registry itself
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceAttributes {
    /// Registry network name
    pub netname: String,
    /// Registry maintainer, if any
    pub maintainer: Option<String>,
}

/// One candidate range as yielded by a range source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRecord {
    /// First address of the range, possibly not aligned to the prefix
    pub first_ip: String,
    /// Address family number (4 or 6)
    pub ip_version: u8,
    /// Prefix length as stored by the registry importer
    pub prefix_len: i64,
    /// Registry attributes
    pub attributes: SourceAttributes,
}

impl RangeRecord {
    /// Convenience constructor
    pub fn new(
        first_ip: impl Into<String>,
        ip_version: u8,
        prefix_len: i64,
        netname: impl Into<String>,
        maintainer: Option<String>,
    ) -> Self {
        Self {
            first_ip: first_ip.into(),
            ip_version,
            prefix_len,
            attributes: SourceAttributes {
                netname: netname.into(),
                maintainer,
            },
        }
    }
}

/// Merged attributes attached to one network in the trie
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AttributeRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    asn_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    asn_name: Option<String>,
    netname: String,
    #[serde(rename = "mnt_by")]
    maintainer: String,
    subnet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    city_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country_name: Option<String>,
    #[serde(rename = "iso_code", skip_serializing_if = "Option::is_none")]
    country_iso_code: Option<String>,
}

impl AttributeRecord {
    /// Record with the registry attributes of `network`
    ///
    /// An absent or empty maintainer becomes [`UNKNOWN_MAINTAINER`].
    pub fn new(network: &Network, netname: impl Into<String>, maintainer: Option<&str>) -> Self {
        let maintainer = maintainer
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_MAINTAINER);
        Self {
            asn_number: None,
            asn_name: None,
            netname: netname.into(),
            maintainer: maintainer.to_string(),
            subnet: network.to_string(),
            city_name: None,
            country_name: None,
            country_iso_code: None,
        }
    }

    /// Set the autonomous system fields
    pub fn with_asn(mut self, number: Option<u32>, name: Option<String>) -> Self {
        self.asn_number = number;
        self.asn_name = name;
        self
    }

    /// Set the city name
    pub fn with_city(mut self, city_name: Option<String>) -> Self {
        self.city_name = city_name;
        self
    }

    /// Set the country fields
    pub fn with_country(mut self, name: Option<String>, iso_code: Option<String>) -> Self {
        self.country_name = name;
        self.country_iso_code = iso_code;
        self
    }

    /// Autonomous system number
    pub fn asn_number(&self) -> Option<u32> {
        self.asn_number
    }

    /// Autonomous system organization
    pub fn asn_name(&self) -> Option<&str> {
        self.asn_name.as_deref()
    }

    /// Registry network name
    pub fn netname(&self) -> &str {
        &self.netname
    }

    /// Registry maintainer or [`UNKNOWN_MAINTAINER`]
    pub fn maintainer(&self) -> &str {
        &self.maintainer
    }

    /// `<address>/<prefix>` label of the registry range
    pub fn subnet(&self) -> &str {
        &self.subnet
    }

    /// English city name
    pub fn city_name(&self) -> Option<&str> {
        self.city_name.as_deref()
    }

    /// English country name
    pub fn country_name(&self) -> Option<&str> {
        self.country_name.as_deref()
    }

    /// ISO country code
    pub fn country_iso_code(&self) -> Option<&str> {
        self.country_iso_code.as_deref()
    }

    /// Persisted map form
    ///
    /// Lookup-derived fields go in first and the registry's own fields last,
    /// so own attributes win if a key ever collides.
    pub fn to_data_value(&self) -> DataValue {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: Option<DataValue>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };

        put(keys::ASN_NUMBER, self.asn_number.map(DataValue::Uint32));
        put(keys::ASN_NAME, self.asn_name.clone().map(DataValue::String));
        put(keys::CITY_NAME, self.city_name.clone().map(DataValue::String));
        put(keys::COUNTRY_NAME, self.country_name.clone().map(DataValue::String));
        put(keys::ISO_CODE, self.country_iso_code.clone().map(DataValue::String));

        put(keys::NETNAME, Some(DataValue::String(self.netname.clone())));
        put(keys::MAINTAINER, Some(DataValue::String(self.maintainer.clone())));
        put(keys::SUBNET, Some(DataValue::String(self.subnet.clone())));

        DataValue::Map(map)
    }

    /// Rebuild a record from its persisted map form
    pub fn from_data_value(value: &DataValue) -> Result<Self> {
        let DataValue::Map(map) = value else {
            return Err(MergeError::Format("record is not a map".to_string()));
        };

        let string = |key: &str| -> Option<String> {
            map.get(key).and_then(DataValue::as_str).map(str::to_string)
        };
        let required = |key: &str| -> Result<String> {
            string(key)
                .ok_or_else(|| MergeError::Format(format!("record is missing '{}'", key)))
        };

        let asn_number = match map.get(keys::ASN_NUMBER) {
            Some(v) => Some(
                v.as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| MergeError::Format("asn_number is not a uint32".to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            asn_number,
            asn_name: string(keys::ASN_NAME),
            netname: required(keys::NETNAME)?,
            maintainer: required(keys::MAINTAINER)?,
            subnet: required(keys::SUBNET)?,
            city_name: string(keys::CITY_NAME),
            country_name: string(keys::COUNTRY_NAME),
            country_iso_code: string(keys::ISO_CODE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Network {
        "203.0.113.0/24".parse().unwrap()
    }

    #[test]
    fn test_default_maintainer() {
        let record = AttributeRecord::new(&network(), "EXAMPLE-NET", None);
        assert_eq!(record.maintainer(), UNKNOWN_MAINTAINER);
        let record = AttributeRecord::new(&network(), "EXAMPLE-NET", Some("  "));
        assert_eq!(record.maintainer(), UNKNOWN_MAINTAINER);
        let record = AttributeRecord::new(&network(), "EXAMPLE-NET", Some("MNT-EXAMPLE"));
        assert_eq!(record.maintainer(), "MNT-EXAMPLE");
    }

    #[test]
    fn test_subnet_label() {
        let record = AttributeRecord::new(&network(), "EXAMPLE-NET", None);
        assert_eq!(record.subnet(), "203.0.113.0/24");
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let record = AttributeRecord::new(&network(), "EXAMPLE-NET", None)
            .with_country(Some("United States".into()), Some("US".into()));
        let value = record.to_data_value();
        let DataValue::Map(map) = &value else {
            panic!("expected map");
        };
        assert!(!map.contains_key(keys::CITY_NAME));
        assert!(!map.contains_key(keys::ASN_NUMBER));
        assert_eq!(map.get(keys::ISO_CODE), Some(&DataValue::String("US".into())));
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_map_round_trip() {
        let record = AttributeRecord::new(&network(), "EXAMPLE-NET", Some("MNT-EX"))
            .with_asn(Some(64496), Some("Example AS".into()))
            .with_city(Some("Springfield".into()))
            .with_country(Some("United States".into()), Some("US".into()));
        let back = AttributeRecord::from_data_value(&record.to_data_value()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_from_data_value_requires_netname() {
        let value = DataValue::Map(BTreeMap::new());
        assert!(matches!(
            AttributeRecord::from_data_value(&value),
            Err(MergeError::Format(_))
        ));
    }

    #[test]
    fn test_json_uses_persisted_keys() {
        let record = AttributeRecord::new(&network(), "EXAMPLE-NET", None)
            .with_country(None, Some("US".into()));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["mnt_by"], "Unknown");
        assert_eq!(json["iso_code"], "US");
        assert!(json.get("city_name").is_none());
    }
}
