//! CSV range source
//!
//! Reads the export of the registry importer: a headered CSV with the columns
//! `first_ip`, `ip_version`, `subnet` (prefix length), `netname` and `mnt_by`.
//! Extra columns are ignored. Files ending in `.gz` are decompressed on the
//! fly. Rows are yielded in file order; the export is expected to be sorted
//! by first address, then by descending prefix length.

use crate::error::{MergeError, Result};
use crate::record::RangeRecord;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Buffer size for file reading
const BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Deserialize)]
struct CsvRow {
    first_ip: String,
    ip_version: u8,
    #[serde(rename = "subnet")]
    prefix_len: i64,
    #[serde(default)]
    netname: String,
    #[serde(default)]
    mnt_by: Option<String>,
}

impl From<CsvRow> for RangeRecord {
    fn from(row: CsvRow) -> Self {
        RangeRecord::new(
            row.first_ip,
            row.ip_version,
            row.prefix_len,
            row.netname,
            row.mnt_by.filter(|m| !m.trim().is_empty()),
        )
    }
}

/// Iterator over the ranges of a CSV export
pub struct CsvRangeSource {
    rows: csv::DeserializeRecordsIntoIter<Box<dyn Read + Send>, CsvRow>,
}

impl CsvRangeSource {
    /// Open a CSV file, decompressing it when the name ends in `.gz`
    ///
    /// # Errors
    /// [`MergeError::Source`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MergeError::Source(format!("{}: {}", path.display(), e)))?;

        let is_gzip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let reader: Box<dyn Read + Send> = if is_gzip {
            Box::new(BufReader::with_capacity(BUFFER_SIZE, GzDecoder::new(file)))
        } else {
            Box::new(BufReader::with_capacity(BUFFER_SIZE, file))
        };
        Ok(Self::from_reader(reader))
    }

    /// Read CSV from any reader
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        let rows = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_deserialize();
        Self { rows }
    }
}

impl Iterator for CsvRangeSource {
    type Item = Result<RangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|row| {
            row.map(RangeRecord::from).map_err(|e| {
                let line = e
                    .position()
                    .map(|p| format!(" at line {}", p.line()))
                    .unwrap_or_default();
                MergeError::Source(format!("unreadable row{}: {}", line, e))
            })
        })
    }
}
