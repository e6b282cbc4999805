//! Batch partitioner.
//!
//! Splits the input record list into K contiguous, size-balanced shards,
//! writes each as its own CSV, writes a human-readable summary, and then
//! reloads every shard file to prove the split lost and duplicated nothing.
//! Downstream extraction must not start when that check fails.

use crate::config::PartitionConfig;
use crate::error::{PipelineError, Result};
use crate::progress::shard_progress;
use crate::table::{count_duplicates, write_csv, Record, Table};
use rayon::prelude::*;
use std::fmt::Write as _;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const SUMMARY_FILE: &str = "batch_summary.txt";

/// Shard sizes for `total` records over `k` shards; the first
/// `total % k` shards take one extra record.
pub fn shard_sizes(total: usize, k: usize) -> Result<Vec<usize>> {
    if k == 0 {
        return Err(PipelineError::InvalidShardCount(k));
    }
    let base = total / k;
    let remainder = total % k;
    Ok((0..k).map(|i| base + usize::from(i < remainder)).collect())
}

/// Walks a cursor through `records` consuming each shard size in turn.
/// Concatenating the returned slices in order reproduces `records`.
pub fn partition<T>(records: &[T], k: usize) -> Result<Vec<&[T]>> {
    let sizes = shard_sizes(records.len(), k)?;
    let mut shards = Vec::with_capacity(k);
    let mut start = 0;
    for size in sizes {
        shards.push(&records[start..start + size]);
        start += size;
    }
    Ok(shards)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub expected_rows: usize,
    pub reloaded_rows: usize,
    pub duplicate_rows: usize,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.expected_rows == self.reloaded_rows && self.duplicate_rows == 0
    }
}

#[derive(Debug)]
pub struct PartitionOutcome {
    pub shard_files: Vec<PathBuf>,
    pub shard_sizes: Vec<usize>,
    pub summary_file: PathBuf,
    pub verification: VerificationReport,
}

pub struct Partitioner<'a> {
    config: &'a PartitionConfig,
}

impl<'a> Partitioner<'a> {
    pub fn new(config: &'a PartitionConfig) -> Self {
        Self { config }
    }

    /// Loads the configured input and partitions it. A failed verification
    /// is returned as [`PipelineError::PartitionIntegrity`].
    pub fn run(&self) -> Result<PartitionOutcome> {
        let table = Table::load_csv(&self.config.input_path)?;
        info!(
            "Loaded {} records from {}",
            table.len(),
            self.config.input_path.display()
        );
        info!("Columns: {:?}", table.headers);
        self.run_on(&table)
    }

    pub fn run_on(&self, table: &Table) -> Result<PartitionOutcome> {
        create_dir_all(&self.config.batch_dir)?;
        info!("Batch directory: {}", self.config.batch_dir.display());

        let shards = partition(&table.rows, self.config.num_batches)?;
        info!(
            "Splitting {} records into {} batches",
            table.len(),
            shards.len()
        );
        for (i, shard) in shards.iter().enumerate() {
            info!(batch = i + 1, "Batch {}: {} records", i + 1, shard.len());
        }

        let shard_files = self.save_shards(table, &shards)?;
        let summary_file = self.write_summary(table, &shards, &shard_files)?;

        let verification = verify_shards(table.len(), &shard_files)?;
        if !verification.passed() {
            return Err(PipelineError::PartitionIntegrity(format!(
                "expected {} rows, reloaded {}, {} duplicates",
                verification.expected_rows,
                verification.reloaded_rows,
                verification.duplicate_rows
            )));
        }

        Ok(PartitionOutcome {
            shard_files,
            shard_sizes: shards.iter().map(|s| s.len()).collect(),
            summary_file,
            verification,
        })
    }

    fn save_shards(&self, table: &Table, shards: &[&[Record]]) -> Result<Vec<PathBuf>> {
        let progress = shard_progress(shards.len() as u64, "batch files")?;
        progress.set_message("Saving batches...");

        let mut saved = Vec::with_capacity(shards.len());
        for (i, shard) in shards.iter().enumerate() {
            let index = i as u64 + 1;
            let path = self.config.naming.path_in(&self.config.batch_dir, index);
            write_csv(&path, &table.headers, shard)?;
            info!(batch = index, "Saved {} ({} records)", path.display(), shard.len());
            saved.push(path);
            progress.inc(1);
        }

        progress.finish_with_message("Batches saved");
        Ok(saved)
    }

    fn write_summary(
        &self,
        table: &Table,
        shards: &[&[Record]],
        shard_files: &[PathBuf],
    ) -> Result<PathBuf> {
        let path = self.config.batch_dir.join(SUMMARY_FILE);
        let text = render_summary(table, shards, shard_files, &self.config.batch_dir);
        std::fs::write(&path, text)?;
        info!("Batch summary saved to {}", path.display());
        Ok(path)
    }
}

fn render_summary(
    table: &Table,
    shards: &[&[Record]],
    shard_files: &[PathBuf],
    batch_dir: &Path,
) -> String {
    let rule = "=".repeat(50);
    let mut out = String::new();
    let _ = writeln!(out, "Batch Split Summary");
    let _ = writeln!(out, "{rule}\n");
    let _ = writeln!(out, "Total records: {}", table.len());
    let _ = writeln!(out, "Number of batches: {}", shards.len());
    let _ = writeln!(out, "Batch directory: {}\n", batch_dir.display());
    let _ = writeln!(out, "Batch Details:");
    let _ = writeln!(out, "{}", "-".repeat(30));

    for (i, (shard, path)) in shards.iter().zip(shard_files).enumerate() {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = writeln!(out, "\nBatch {:02}:", i + 1);
        let _ = writeln!(out, "  File: {file_name}");
        let _ = writeln!(out, "  Records: {}", shard.len());
        match (shard.first(), shard.last()) {
            (Some(first), Some(last)) => {
                let _ = writeln!(out, "  First: {}", table.describe_row(first));
                let _ = writeln!(out, "  Last: {}", table.describe_row(last));
            }
            _ => {
                let _ = writeln!(out, "  First: (empty)");
                let _ = writeln!(out, "  Last: (empty)");
            }
        }
    }
    out
}

/// Reloads every shard file, concatenates them in order and checks the row
/// count against `expected_rows` and that no row appears twice.
pub fn verify_shards(expected_rows: usize, shard_files: &[PathBuf]) -> Result<VerificationReport> {
    info!("Verifying batch integrity across {} files", shard_files.len());

    let reloaded: Vec<Table> = shard_files
        .par_iter()
        .map(|path| Table::load_csv(path))
        .collect::<Result<_>>()?;

    let combined: Vec<Record> = reloaded.into_iter().flat_map(|t| t.rows).collect();
    let report = VerificationReport {
        expected_rows,
        reloaded_rows: combined.len(),
        duplicate_rows: count_duplicates(&combined),
    };

    if report.expected_rows == report.reloaded_rows {
        info!("Count verification passed: {} records", report.reloaded_rows);
    } else {
        error!(
            "Count mismatch! Original: {}, reloaded: {}",
            report.expected_rows, report.reloaded_rows
        );
    }
    if report.duplicate_rows == 0 {
        info!("No duplicates found across batches");
    } else {
        error!("Found {} duplicate records across batches", report.duplicate_rows);
    }

    Ok(report)
}
