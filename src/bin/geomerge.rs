mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{cmd_build, cmd_inspect, cmd_query, BuildArgs};

#[derive(Parser)]
#[command(name = "geomerge")]
#[command(
    about = "Merge registry IP ranges with ASN and city data into a lookup database",
    long_about = "geomerge - Build a longest-prefix-match IP database from registry ranges\n\n\
    Reads the ranges exported from Regional Internet Registry dumps, drops private and\n\
    malformed entries, enriches every range with its autonomous system and location from\n\
    GeoLite2 ASN/City databases, and writes one memory-mappable database file.\n\n\
    Examples:\n\
      geomerge build --ranges ranges.csv.gz --asn-db GeoLite2-ASN.mmdb \\\n\
        --city-db GeoLite2-City.mmdb -o ASN_COUNTRY_AND_CITY.db\n\
      geomerge query ASN_COUNTRY_AND_CITY.db 203.0.113.10\n\
      geomerge inspect ASN_COUNTRY_AND_CITY.db --json"
)]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a database from a ranges CSV and the ASN/City databases
    Build(BuildArgs),

    /// Look up one IP address (prints a JSON array, exit 1 when not found)
    Query {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IPv4 or IPv6 address
        #[arg(value_name = "IP")]
        query: String,

        /// Quiet mode - no output, only exit code (0=found, 1=not found)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show header and metadata of a database
    Inspect {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli_utils::init_tracing(cli.verbose);

    match cli.command {
        Commands::Build(args) => cmd_build(args),
        Commands::Query {
            database,
            query,
            quiet,
        } => cmd_query(database, query, quiet),
        Commands::Inspect { database, json } => cmd_inspect(database, json, cli.verbose),
    }
}
