//! Enrichment of canonical networks with ASN and City lookups

use crate::data_section::DataValue;
use crate::error::{MergeError, Result};
use crate::network::Network;
use crate::point_lookup::PointLookup;
use crate::record::{AttributeRecord, SourceAttributes};
use std::net::IpAddr;

/// Autonomous system fields of an ASN database record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsnInfo {
    /// `autonomous_system_number`
    pub number: Option<u32>,
    /// `autonomous_system_organization`
    pub organization: Option<String>,
}

impl AsnInfo {
    /// Pick the fields out of a GeoLite2-ASN record
    ///
    /// Fields of an unexpected type are treated as absent.
    pub fn from_value(value: &DataValue) -> Self {
        Self {
            number: value
                .get("autonomous_system_number")
                .and_then(DataValue::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            organization: string_at(value, &["autonomous_system_organization"]),
        }
    }
}

/// Location fields of a City database record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CityInfo {
    /// `city.names.en`
    pub city_name: Option<String>,
    /// `country.names.en`
    pub country_name: Option<String>,
    /// `country.iso_code`
    pub country_iso_code: Option<String>,
}

impl CityInfo {
    /// Pick the fields out of a GeoLite2-City record
    pub fn from_value(value: &DataValue) -> Self {
        Self {
            city_name: string_at(value, &["city", "names", "en"]),
            country_name: string_at(value, &["country", "names", "en"]),
            country_iso_code: string_at(value, &["country", "iso_code"]),
        }
    }
}

fn string_at(value: &DataValue, path: &[&str]) -> Option<String> {
    value
        .get_path(path)
        .and_then(DataValue::as_str)
        .map(str::to_string)
}

/// Builds attribute records by probing the ASN and City sources
#[derive(Clone, Copy)]
pub struct Enricher<'a> {
    asn: &'a dyn PointLookup,
    city: &'a dyn PointLookup,
}

impl<'a> Enricher<'a> {
    /// Create an enricher over the two lookup sources
    pub fn new(asn: &'a dyn PointLookup, city: &'a dyn PointLookup) -> Self {
        Self { asn, city }
    }

    /// Merge own attributes with both lookups for `network`
    ///
    /// Both sources are queried at the network's base address.
    ///
    /// # Errors
    /// [`MergeError::EnrichmentLookup`] if a source reports a structural
    /// failure. A source without data for the address is not an error.
    pub fn enrich(&self, network: &Network, own: &SourceAttributes) -> Result<AttributeRecord> {
        let base = network.base();
        let asn = self.asn_info(base)?;
        let city = self.city_info(base)?;

        Ok(
            AttributeRecord::new(network, own.netname.clone(), own.maintainer.as_deref())
                .with_asn(asn.number, asn.organization)
                .with_city(city.city_name)
                .with_country(city.country_name, city.country_iso_code),
        )
    }

    /// ASN fields for one address
    pub fn asn_info(&self, addr: IpAddr) -> Result<AsnInfo> {
        let value = self.asn.query(addr).map_err(|e| {
            MergeError::EnrichmentLookup(format!("ASN lookup for {}: {}", addr, e))
        })?;
        Ok(value.as_ref().map(AsnInfo::from_value).unwrap_or_default())
    }

    /// City fields for one address
    pub fn city_info(&self, addr: IpAddr) -> Result<CityInfo> {
        let value = self.city.query(addr).map_err(|e| {
            MergeError::EnrichmentLookup(format!("City lookup for {}: {}", addr, e))
        })?;
        Ok(value.as_ref().map(CityInfo::from_value).unwrap_or_default())
    }
}
