//! Opaque tabular records loaded from and written to CSV.
//!
//! Rows are kept as ordered string fields; no schema beyond the header is
//! enforced. Malformed CSV (ragged rows, broken quoting) surfaces as
//! [`PipelineError::Csv`].

use crate::error::{PipelineError, Result};
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::warn;

pub type Record = Vec<String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Record>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Loads a CSV file with a header row. `.gz` files are decompressed on the
    /// fly. A record that is not valid UTF-8 is read as Latin-1, so accented
    /// names keep their characters and stay distinct.
    pub fn load_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::with_capacity(1024 * 1024, reader));

        let mut latin1_records = 0;
        let headers = decode_record(csv_reader.byte_headers()?, &mut latin1_records);

        let mut rows = Vec::new();
        for record in csv_reader.byte_records() {
            rows.push(decode_record(&record?, &mut latin1_records));
        }

        if latin1_records > 0 {
            warn!(
                "{}: {} records were not valid UTF-8 and were read as Latin-1",
                path.display(),
                latin1_records
            );
        }
        Ok(Self { headers, rows })
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        write_csv(path, &self.headers, &self.rows)
    }

    /// Number of rows that repeat an earlier row exactly (all columns).
    pub fn duplicate_count(&self) -> usize {
        count_duplicates(&self.rows)
    }

    /// Short human label for a row: `surname, first_name` when both columns
    /// exist, otherwise the first field.
    pub fn describe_row(&self, row: &Record) -> String {
        match (self.column_index("surname"), self.column_index("first_name")) {
            (Some(s), Some(f)) => format!(
                "{}, {}",
                row.get(s).map(String::as_str).unwrap_or(""),
                row.get(f).map(String::as_str).unwrap_or("")
            ),
            _ => row.first().cloned().unwrap_or_default(),
        }
    }
}

/// UTF-8 when every field is valid, otherwise the whole record as Latin-1.
fn decode_record(record: &ByteRecord, latin1_records: &mut usize) -> Record {
    let utf8: Option<Record> = record
        .iter()
        .map(|field| std::str::from_utf8(field).ok().map(str::to_owned))
        .collect();
    utf8.unwrap_or_else(|| {
        *latin1_records += 1;
        record.iter().map(latin1).collect()
    })
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

pub fn write_csv(path: &Path, headers: &[String], rows: &[Record]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn count_duplicates(rows: &[Record]) -> usize {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.iter().filter(|row| !seen.insert(*row)).count()
}
