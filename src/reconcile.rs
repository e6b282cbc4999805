//! Reconciliation of extraction shards.
//!
//! Scans the output directory, recovers shard indices from file names and
//! reports which of `1..=expected` are missing, alongside totals from the
//! stats sidecars. The scan is read-only apart from the two summary files and
//! is safe to run while workers are still writing. A shard that is still
//! running and a shard that failed look the same here: both are missing.
//! Missing shards are only reported; re-submitting them is up to the caller.

use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::metadata::ShardStats;
use crate::naming::ShardNaming;
use crate::progress::shard_progress;
use chrono::{DateTime, Utc};
use glob::glob;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const SUMMARY_TEXT_FILE: &str = "extraction_summary.txt";
pub const SUMMARY_JSON_FILE: &str = "extraction_summary.json";

const KNOWN_LIMITATION: &str = "A missing shard is either still running or failed; \
this scan cannot tell which. Check the scheduler's job status before re-submitting.";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub shards_with_stats: usize,
    pub total_rows: u64,
    pub total_unique_users: u64,
    pub total_size_bytes: u64,
    pub total_query_seconds: f64,
}

impl AggregateStats {
    fn add(&mut self, stats: &ShardStats) {
        self.shards_with_stats += 1;
        self.total_rows += stats.rows.unwrap_or(0);
        self.total_unique_users += stats.unique_users.unwrap_or(0);
        self.total_size_bytes += stats.file_size_bytes.unwrap_or(0);
        self.total_query_seconds += stats.query_time_seconds.unwrap_or(0.0);
    }

    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }

    fn average(&self, total: f64) -> Option<f64> {
        (self.shards_with_stats > 0).then(|| total / self.shards_with_stats as f64)
    }

    pub fn average_rows(&self) -> Option<f64> {
        self.average(self.total_rows as f64)
    }

    pub fn average_size_mb(&self) -> Option<f64> {
        self.average(self.total_size_mb())
    }

    pub fn average_query_seconds(&self) -> Option<f64> {
        self.average(self.total_query_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardDetail {
    pub shard_index: u64,
    pub stats: ShardStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub output_dir: PathBuf,
    pub expected_shards: u64,
    pub complete: bool,
    pub found: BTreeSet<u64>,
    pub missing: BTreeSet<u64>,
    /// Found shards with no sidecar; they add nothing to the aggregate.
    pub without_stats: BTreeSet<u64>,
    /// Sidecars whose data file is absent (left from an earlier attempt).
    pub orphaned_stats: BTreeSet<u64>,
    /// Found shards whose sidecar could not be read or parsed.
    pub malformed_stats: BTreeSet<u64>,
    pub aggregate: AggregateStats,
    pub details: Vec<ShardDetail>,
    pub generated_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// Scheduler command re-running exactly the missing indices.
    pub fn resubmit_command(&self, script: &str) -> Option<String> {
        if self.missing.is_empty() {
            return None;
        }
        let ids: Vec<String> = self.missing.iter().map(u64::to_string).collect();
        Some(format!("qsub -t {} {}", ids.join(","), script))
    }

    pub fn render(&self, script: &str) -> String {
        let rule = "=".repeat(60);
        let agg = &self.aggregate;
        let mut out = String::new();

        let _ = writeln!(out, "{rule}\nEXTRACTION RECONCILIATION\n{rule}\n");
        let _ = writeln!(out, "Output directory: {}", self.output_dir.display());
        let _ = writeln!(out, "Expected shards: {}", self.expected_shards);
        let _ = writeln!(out, "Found shard files: {}", self.found.len());
        let _ = writeln!(out, "Found stats files: {}", agg.shards_with_stats);

        if let Some(command) = self.resubmit_command(script) {
            let _ = writeln!(out, "\nMISSING SHARDS: {}", join(&self.missing));
            let _ = writeln!(out, "Re-run these tasks:\n  {command}");
            let _ = writeln!(out, "\nNote: {KNOWN_LIMITATION}");
        } else {
            let _ = writeln!(out, "\nAll shards extracted.");
        }
        if !self.without_stats.is_empty() {
            let _ = writeln!(out, "Shards without stats: {}", join(&self.without_stats));
        }
        if !self.orphaned_stats.is_empty() {
            let _ = writeln!(
                out,
                "Stats without shard file: {}",
                join(&self.orphaned_stats)
            );
        }
        if !self.malformed_stats.is_empty() {
            let _ = writeln!(
                out,
                "UNREADABLE STATS FILES: {}",
                join(&self.malformed_stats)
            );
        }

        let _ = writeln!(out, "\n{rule}\nEXTRACTION STATISTICS\n{rule}\n");
        let _ = writeln!(out, "Total rows: {}", agg.total_rows);
        let _ = writeln!(out, "Total unique users: {}", agg.total_unique_users);
        let _ = writeln!(
            out,
            "Total size: {:.2} MB ({:.2} GB)",
            agg.total_size_mb(),
            agg.total_size_mb() / 1024.0
        );

        if let (Some(rows), Some(size), Some(secs)) = (
            agg.average_rows(),
            agg.average_size_mb(),
            agg.average_query_seconds(),
        ) {
            let _ = writeln!(out, "\nAverage per shard:");
            let _ = writeln!(out, "  Rows: {rows:.0}");
            let _ = writeln!(out, "  Size: {size:.2} MB");
            let _ = writeln!(out, "  Query time: {secs:.2} seconds");
        }

        if !self.details.is_empty() {
            let _ = writeln!(out, "\nFirst shards:");
            for detail in self.details.iter().take(3) {
                write_detail(&mut out, detail);
            }
            if self.details.len() > 6 {
                let _ = writeln!(out, "\nLast shards:");
                for detail in &self.details[self.details.len() - 3..] {
                    write_detail(&mut out, detail);
                }
            }
        }
        out
    }
}

fn write_detail(out: &mut String, detail: &ShardDetail) {
    let rows = detail
        .stats
        .rows
        .map_or_else(|| "N/A".to_string(), |r| r.to_string());
    let size = detail
        .stats
        .file_size_bytes
        .map_or_else(|| "N/A".to_string(), |b| format!("{:.2}", b as f64 / (1024.0 * 1024.0)));
    let _ = writeln!(out, "  Shard {}: {} rows, {} MB", detail.shard_index, rows, size);
}

fn join(ids: &BTreeSet<u64>) -> String {
    ids.iter().map(u64::to_string).collect::<Vec<_>>().join(", ")
}

/// Indices recovered from the file names matching `pattern`.
fn scan_indices(pattern: &str, parse: impl Fn(&str) -> Option<u64>) -> Result<BTreeSet<u64>> {
    let mut found = BTreeSet::new();
    for entry in glob(pattern)? {
        match entry {
            Ok(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match parse(&name) {
                    Some(index) => {
                        found.insert(index);
                    }
                    None => warn!("Ignoring unrecognised file {}", path.display()),
                }
            }
            Err(e) => warn!("Error reading glob entry: {}", e),
        }
    }
    Ok(found)
}

/// Expected indices `1..=expected` not present in `found`.
pub fn missing_indices(expected: u64, found: &BTreeSet<u64>) -> BTreeSet<u64> {
    (1..=expected).filter(|i| !found.contains(i)).collect()
}

/// Builds the report from what is on disk right now. Writes nothing.
pub fn scan(config: &ReconcileConfig) -> Result<ReconciliationReport> {
    let dir = config.output_dir.as_path();
    let naming = &config.naming;

    let found = scan_indices(&naming.data_glob(dir), |n| naming.parse_index(n))?;
    let stats_found = scan_indices(&naming.stats_glob(dir), |n| naming.parse_stats_index(n))?;
    let missing = missing_indices(config.expected_shards, &found);

    let with_stats: Vec<u64> = found.intersection(&stats_found).copied().collect();
    let without_stats: BTreeSet<u64> = found.difference(&stats_found).copied().collect();
    let orphaned_stats: BTreeSet<u64> = stats_found.difference(&found).copied().collect();

    let (details, malformed_stats) = read_details(dir, naming, &with_stats)?;
    let mut aggregate = AggregateStats::default();
    for detail in &details {
        aggregate.add(&detail.stats);
    }

    Ok(ReconciliationReport {
        output_dir: dir.to_path_buf(),
        expected_shards: config.expected_shards,
        complete: missing.is_empty() && malformed_stats.is_empty(),
        found,
        missing,
        without_stats,
        orphaned_stats,
        malformed_stats,
        aggregate,
        details,
        generated_at: Utc::now(),
    })
}

/// Reads the sidecars of `indices`. A sidecar that cannot be read is logged
/// and returned in the second set instead of failing the scan.
fn read_details(
    dir: &Path,
    naming: &ShardNaming,
    indices: &[u64],
) -> Result<(Vec<ShardDetail>, BTreeSet<u64>)> {
    let progress = shard_progress(indices.len() as u64, "stats files")?;
    progress.set_message("Reading shard stats...");

    let results: Vec<(u64, Result<ShardStats>)> = indices
        .par_iter()
        .map(|&shard_index| {
            let stats = ShardStats::read(&naming.stats_path_in(dir, shard_index));
            progress.inc(1);
            (shard_index, stats)
        })
        .collect();
    progress.finish_with_message("Stats read");

    let mut details = Vec::with_capacity(results.len());
    let mut malformed = BTreeSet::new();
    for (shard_index, stats) in results {
        match stats {
            Ok(stats) => details.push(ShardDetail { shard_index, stats }),
            Err(e) => {
                error!(shard = shard_index, error = %e, "Unreadable stats file");
                malformed.insert(shard_index);
            }
        }
    }
    Ok((details, malformed))
}

/// Scans, logs the report and writes the text and JSON summaries into the
/// output directory.
pub fn reconcile(config: &ReconcileConfig) -> Result<ReconciliationReport> {
    let report = scan(config)?;
    let text = report.render(&config.resubmit_script);
    for line in text.lines() {
        info!("{}", line);
    }

    std::fs::create_dir_all(&config.output_dir)?;
    let text_path = config.output_dir.join(SUMMARY_TEXT_FILE);
    std::fs::write(&text_path, &text)?;
    let json_path = config.output_dir.join(SUMMARY_JSON_FILE);
    std::fs::write(&json_path, serde_json::to_string_pretty(&report)?)?;
    info!(
        "Summary saved to {} and {}",
        text_path.display(),
        json_path.display()
    );

    if report.complete {
        info!("Extraction complete: all {} shards present", report.expected_shards);
    } else {
        warn!(
            "Extraction incomplete: {} of {} shards missing, {} stats files unreadable",
            report.missing.len(),
            report.expected_shards,
            report.malformed_stats.len()
        );
    }
    Ok(report)
}
