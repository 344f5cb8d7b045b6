use anyhow::{Context, Result};
use geomerge::{DataValue, Database, MmdbReader, Network};
use serde_json::json;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::cli_utils::{data_value_to_json, is_geomerge_file};

/// Raw record with the network that answered
struct Hit {
    record: DataValue,
    network: Network,
}

pub fn cmd_query(database: PathBuf, query: String, quiet: bool) -> Result<()> {
    let lookup = open(&database)?;

    let addr: IpAddr = query
        .trim()
        .parse()
        .with_context(|| format!("Not an IP address: {}", query))?;
    let result = lookup(addr).with_context(|| format!("Query failed for: {}", query))?;

    let found = result.is_some();
    if quiet {
        // Quiet mode: no output, just exit code
        std::process::exit(if found { 0 } else { 1 });
    }

    // Always an array for consistency
    match result {
        Some(hit) => {
            let mut record = data_value_to_json(&hit.record);
            if let serde_json::Value::Object(ref mut map) = record {
                map.insert("cidr".to_string(), json!(hit.network.to_string()));
                map.insert("prefix_len".to_string(), json!(hit.network.prefix_len()));
            }
            println!("{}", serde_json::to_string_pretty(&json!([record]))?);
        }
        None => println!("[]"),
    }

    std::process::exit(if found { 0 } else { 1 });
}

type Lookup = Box<dyn Fn(IpAddr) -> Result<Option<Hit>>>;

/// Open a merged database or a MaxMind DB file
fn open(path: &Path) -> Result<Lookup> {
    let context = || format!("Failed to load database: {}", path.display());

    if is_geomerge_file(path) {
        let db = Database::open(path).with_context(context)?;
        return Ok(Box::new(move |addr| {
            Ok(db.lookup_value(addr)?.map(|hit| Hit {
                record: hit.record,
                network: hit.network,
            }))
        }));
    }

    let reader = MmdbReader::open(path).with_context(context)?;
    Ok(Box::new(move |addr| match reader.lookup(addr)? {
        Some((record, prefix_len)) => Ok(Some(Hit {
            record,
            network: Network::new(addr, prefix_len)?,
        })),
        None => Ok(None),
    }))
}
