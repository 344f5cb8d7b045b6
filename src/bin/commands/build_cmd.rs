use anyhow::{Context, Result};
use clap::Args;
use geomerge::{
    publish, BuildOptions, CsvRangeSource, Enricher, MmdbReader, NetworkBuilder, NoLookup,
    OutputFormat, Pipeline, PointLookup, RecordSize, Serializer,
};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Options of the `build` subcommand
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Registry ranges CSV (first_ip, ip_version, subnet, netname, mnt_by); .gz is decompressed
    #[arg(long, value_name = "CSV")]
    pub ranges: PathBuf,

    /// ASN database (GeoLite2-ASN.mmdb); ASN fields stay empty without it
    #[arg(long, value_name = "MMDB", env = "GEOMERGE_ASN_DB")]
    pub asn_db: Option<PathBuf>,

    /// City database (GeoLite2-City.mmdb); location fields stay empty without it
    #[arg(long, value_name = "MMDB", env = "GEOMERGE_CITY_DB")]
    pub city_db: Option<PathBuf>,

    /// Output database file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output layout: geomerge, or mmdb for MaxMind DB readers
    #[arg(long, default_value = "geomerge", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Run enrichment lookups in parallel within each batch
    #[arg(long)]
    pub parallel: bool,

    /// Number of ranges processed per batch
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Node record size in bits: 24, 28 or 32 (default: smallest that fits)
    #[arg(long, value_parser = parse_record_size)]
    pub record_size: Option<RecordSize>,

    /// Custom database type name for metadata
    #[arg(long)]
    pub database_type: Option<String>,

    /// English description for metadata
    #[arg(long)]
    pub description: Option<String>,

    /// Keep private, loopback and link-local ranges
    #[arg(long)]
    pub allow_private: bool,
}

fn parse_record_size(s: &str) -> std::result::Result<RecordSize, String> {
    s.parse::<u16>()
        .ok()
        .and_then(RecordSize::from_bits)
        .ok_or_else(|| format!("'{}' is not a record size (24, 28 or 32)", s))
}

fn parse_format(s: &str) -> std::result::Result<OutputFormat, String> {
    s.parse()
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
    let start = Instant::now();

    let asn = open_lookup(args.asn_db.as_deref(), "ASN")?;
    let city = open_lookup(args.city_db.as_deref(), "City")?;
    let source = CsvRangeSource::open(&args.ranges)
        .with_context(|| format!("Failed to open ranges: {}", args.ranges.display()))?;

    let options = BuildOptions {
        batch_size: args.batch_size,
        parallel: args.parallel,
        ..BuildOptions::default()
    };
    let builder = NetworkBuilder::new().allow_private(args.allow_private);
    let enricher = Enricher::new(asn.as_ref(), city.as_ref());

    tracing::info!(ranges = %args.ranges.display(), parallel = args.parallel, "building database");
    let output = Pipeline::new(builder, enricher, options)
        .run(source)
        .context("Build failed")?;

    let mut serializer = Serializer::new().with_format(args.format).with_build_epoch(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );
    if let Some(db_type) = args.database_type {
        serializer = serializer.with_database_type(db_type);
    }
    if let Some(desc) = args.description {
        serializer = serializer.with_description("en", desc);
    }
    if let Some(record_size) = args.record_size {
        serializer = serializer.with_record_size(record_size);
    }

    let bytes = publish(&output.store, &args.output, &serializer)
        .with_context(|| format!("Failed to write database: {}", args.output.display()))?;

    tracing::info!(
        format = %args.format,
        inserted = output.stats.inserted,
        skipped = output.stats.skipped(),
        bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Database generated in {}",
        args.output.display()
    );
    println!("{}", args.output.display());
    Ok(())
}

fn open_lookup(path: Option<&Path>, name: &str) -> Result<Box<dyn PointLookup>> {
    match path {
        Some(path) => {
            let reader = MmdbReader::open(path)
                .with_context(|| format!("Failed to open {} database: {}", name, path.display()))?;
            tracing::info!(
                database_type = reader.database_type().as_deref().unwrap_or("unknown"),
                "loaded {} database {}",
                name,
                path.display()
            );
            Ok(Box::new(reader))
        }
        None => {
            tracing::warn!("no {} database given, its attributes will be absent", name);
            Ok(Box::new(NoLookup))
        }
    }
}
