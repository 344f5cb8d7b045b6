use anyhow::{Context, Result};
use geomerge::format::meta;
use geomerge::mmdb::IpVersion;
use geomerge::{DataValue, Database, MmdbReader};
use serde_json::json;
use std::path::PathBuf;

use crate::cli_utils::{
    data_value_to_json, format_data_value, format_unix_timestamp, is_geomerge_file,
};

pub fn cmd_inspect(database: PathBuf, json_output: bool, verbose: bool) -> Result<()> {
    if !is_geomerge_file(&database) {
        return inspect_mmdb(database, json_output, verbose);
    }

    let db = Database::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let header = *db.header();
    let metadata = db.metadata().context("Failed to decode metadata")?;

    let count = |key: &str| metadata.get(key).and_then(DataValue::as_u64).unwrap_or(0);
    let ipv4_networks = count(meta::IPV4_NETWORK_COUNT);
    let ipv6_networks = count(meta::IPV6_NETWORK_COUNT);

    if json_output {
        let output = json!({
            "file": database.display().to_string(),
            "format": "geomerge",
            "format_version": format!("{}.{}", header.format_major.get(), header.format_minor.get()),
            "record_size": db.record_size().bits(),
            "ipv4_node_count": header.ipv4_node_count.get(),
            "ipv6_node_count": header.ipv6_node_count.get(),
            "ipv4_network_count": ipv4_networks,
            "ipv6_network_count": ipv6_networks,
            "data_size": header.data_size.get(),
            "total_size": header.total_size.get(),
            "metadata": data_value_to_json(&metadata),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {}", database.display());
    println!(
        "Format:   GEOMERGE v{}.{}",
        header.format_major.get(),
        header.format_minor.get()
    );
    println!("Size:     {} bytes", header.total_size.get());
    println!();
    println!("Search trees:");
    println!("  Record size:     {} bits", db.record_size().bits());
    println!(
        "  IPv4:            {} nodes, {} networks",
        header.ipv4_node_count.get(),
        ipv4_networks
    );
    println!(
        "  IPv6:            {} nodes, {} networks",
        header.ipv6_node_count.get(),
        ipv6_networks
    );
    println!("  Value pool:      {} bytes", header.data_size.get());

    println!();
    println!("Metadata:");
    if let Some(db_type) = metadata.get(meta::DATABASE_TYPE).and_then(DataValue::as_str) {
        println!("  Database type:   {}", db_type);
    }
    if let Some(DataValue::Map(desc_map)) = metadata.get(meta::DESCRIPTION) {
        println!("  Description:");
        for (lang, desc) in desc_map {
            if let Some(desc) = desc.as_str() {
                println!("    {}: {}", lang, desc);
            }
        }
    }
    if let Some(epoch) = metadata.get(meta::BUILD_EPOCH).and_then(DataValue::as_u64) {
        println!("  Build time:      {} ({})", format_unix_timestamp(epoch), epoch);
    }

    if verbose {
        println!();
        println!("Full metadata:");
        println!("{}", format_data_value(&metadata, "  "));
    }

    Ok(())
}

fn inspect_mmdb(database: PathBuf, json_output: bool, verbose: bool) -> Result<()> {
    let reader = MmdbReader::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let header = *reader.header();
    let metadata = reader.metadata().context("Failed to decode metadata")?;
    let data_size = header.data_end - header.data_start;
    let ip_version = match header.ip_version {
        IpVersion::V4 => 4,
        IpVersion::V6 => 6,
    };

    if json_output {
        let output = json!({
            "file": database.display().to_string(),
            "format": "mmdb",
            "ip_version": ip_version,
            "record_size": header.record_size.bits(),
            "node_count": header.node_count,
            "data_size": data_size,
            "metadata": data_value_to_json(&metadata),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {}", database.display());
    println!("Format:   MaxMind DB");
    println!();
    println!("Search tree:");
    println!("  IP version:      {}", ip_version);
    println!("  Record size:     {} bits", header.record_size.bits());
    println!("  Nodes:           {}", header.node_count);
    println!("  Data section:    {} bytes", data_size);

    println!();
    println!("Metadata:");
    if let Some(db_type) = reader.database_type() {
        println!("  Database type:   {}", db_type);
    }
    if let Some(epoch) = metadata.get(meta::BUILD_EPOCH).and_then(DataValue::as_u64) {
        println!("  Build time:      {} ({})", format_unix_timestamp(epoch), epoch);
    }

    if verbose {
        println!();
        println!("Full metadata:");
        println!("{}", format_data_value(&metadata, "  "));
    }

    Ok(())
}
