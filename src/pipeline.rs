//! Batch build pipeline: validate, enrich, insert, publish

use crate::enrich::Enricher;
use crate::error::{MergeError, Result};
use crate::network::{Network, NetworkBuilder};
use crate::record::{AttributeRecord, RangeRecord};
use crate::serializer::Serializer;
use crate::trie::TrieStore;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Build tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Number of records pulled from the source at a time
    pub batch_size: usize,
    /// Run the enrichment lookups of a batch on the rayon pool
    pub parallel: bool,
    /// Log progress every this many inserted records (0 disables)
    pub progress_interval: u64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            parallel: false,
            progress_interval: 1000,
        }
    }
}

/// Counters of one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Records pulled from the source
    pub records_read: u64,
    /// Records inserted into the store
    pub inserted: u64,
    /// Records skipped as private, loopback or link-local
    pub skipped_reserved: u64,
    /// Records skipped for a malformed address or prefix
    pub skipped_invalid: u64,
}

impl BuildStats {
    /// Total number of skipped records
    pub fn skipped(&self) -> u64 {
        self.skipped_reserved + self.skipped_invalid
    }
}

/// Result of a successful build
#[derive(Debug)]
pub struct BuildOutput {
    /// Populated tries
    pub store: TrieStore,
    /// Build counters
    pub stats: BuildStats,
}

/// Drives ranges from a source through validation and enrichment into a store
pub struct Pipeline<'a> {
    builder: NetworkBuilder,
    enricher: Enricher<'a>,
    options: BuildOptions,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline
    pub fn new(builder: NetworkBuilder, enricher: Enricher<'a>, options: BuildOptions) -> Self {
        Self {
            builder,
            enricher,
            options,
        }
    }

    /// Consume `source` and build the store
    ///
    /// Records failing validation are logged, counted and skipped. Any other
    /// error (unreadable source, lookup failure) aborts the build.
    pub fn run<I, E>(&self, source: I) -> Result<BuildOutput>
    where
        I: IntoIterator<Item = std::result::Result<RangeRecord, E>>,
        E: Into<MergeError>,
    {
        let mut store = TrieStore::new();
        let mut stats = BuildStats::default();
        let batch_size = self.options.batch_size.max(1);
        let mut source = source.into_iter();
        let mut batch = Vec::with_capacity(batch_size);

        loop {
            batch.clear();
            for item in source.by_ref().take(batch_size) {
                batch.push(item.map_err(Into::into)?);
            }
            if batch.is_empty() {
                break;
            }
            stats.records_read += batch.len() as u64;
            self.process_batch(&batch, &mut store, &mut stats)?;
        }

        tracing::info!(
            records_read = stats.records_read,
            inserted = stats.inserted,
            skipped_reserved = stats.skipped_reserved,
            skipped_invalid = stats.skipped_invalid,
            "build finished"
        );
        Ok(BuildOutput { store, stats })
    }

    fn process_batch(
        &self,
        batch: &[RangeRecord],
        store: &mut TrieStore,
        stats: &mut BuildStats,
    ) -> Result<()> {
        let mut valid = Vec::with_capacity(batch.len());
        for record in batch {
            match self.builder.build_record(record) {
                Ok(network) => valid.push((network, record)),
                Err(err) if err.is_recoverable() => skip(record, &err, stats),
                Err(err) => return Err(err),
            }
        }

        if self.options.parallel {
            // Lookups run concurrently, insertion stays in source order
            let enriched: Vec<Result<AttributeRecord>> = valid
                .par_iter()
                .map(|(network, record)| self.enricher.enrich(network, &record.attributes))
                .collect();
            for ((network, _), attributes) in valid.iter().zip(enriched) {
                self.insert(store, network, attributes?, stats)?;
            }
        } else {
            for (network, record) in &valid {
                let attributes = self.enricher.enrich(network, &record.attributes)?;
                self.insert(store, network, attributes, stats)?;
            }
        }
        Ok(())
    }

    fn insert(
        &self,
        store: &mut TrieStore,
        network: &Network,
        attributes: AttributeRecord,
        stats: &mut BuildStats,
    ) -> Result<()> {
        store.insert(network, attributes)?;
        stats.inserted += 1;
        let interval = self.options.progress_interval;
        if interval > 0 && stats.inserted % interval == 0 {
            tracing::info!("Processed {} records", stats.inserted);
        }
        Ok(())
    }
}

fn skip(record: &RangeRecord, err: &MergeError, stats: &mut BuildStats) {
    match err {
        MergeError::ReservedOrPrivate(_) => {
            stats.skipped_reserved += 1;
            tracing::info!(first_ip = %record.first_ip, "skipping reserved range: {}", err);
        }
        _ => {
            stats.skipped_invalid += 1;
            tracing::warn!(
                first_ip = %record.first_ip,
                prefix_len = record.prefix_len,
                "skipping invalid range: {}",
                err
            );
        }
    }
}

/// Serialize `store` to `path` atomically
///
/// The file is written next to `path` under a temporary name and renamed
/// into place once complete. On failure the temporary file is removed and
/// `path` is left untouched.
pub fn publish(store: &TrieStore, path: impl AsRef<Path>, serializer: &Serializer) -> Result<u64> {
    let path = path.as_ref();
    let temp = temp_path(path);

    let written = write_file(store, &temp, serializer).and_then(|written| {
        fs::rename(&temp, path).map_err(|e| {
            MergeError::Io(format!("Failed to move database to {}: {}", path.display(), e))
        })?;
        Ok(written)
    });

    match written {
        Ok(bytes) => {
            tracing::info!(path = %path.display(), bytes, "database published");
            Ok(bytes)
        }
        Err(err) => {
            let _ = fs::remove_file(&temp);
            Err(err)
        }
    }
}

fn write_file(store: &TrieStore, temp: &Path, serializer: &Serializer) -> Result<u64> {
    let file = File::create(temp)
        .map_err(|e| MergeError::Io(format!("Failed to create {}: {}", temp.display(), e)))?;
    let mut writer = BufWriter::new(file);
    let written = serializer.serialize(store, &mut writer)?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| MergeError::Io(e.error().to_string()))?;
    file.sync_all()?;
    Ok(written)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}
