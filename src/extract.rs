//! Offset-based shard extraction.
//!
//! One worker process runs one shard. The shard index fixes a window over the
//! source's key order; the page is deduplicated and written as
//! `<stem>.parquet` plus `<stem>_stats.txt`. Both files are written under
//! temporary names and renamed into place only after both were written. Data
//! is renamed first and the sidecar last. If the sidecar cannot be moved into
//! place, any older sidecar is removed too, so a data file is never paired
//! with stats from another run; reconciliation lists it as a shard without
//! stats.

use crate::columnar::write_names_parquet;
use crate::config::ExtractConfig;
use crate::error::Result;
use crate::metadata::ShardMetadata;
use crate::source::{NameRow, PageQuery, TabularSource};
use crate::window::ShardWindow;
use chrono::Utc;
use std::collections::HashSet;
use std::fs::{create_dir_all, remove_file, rename};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ShardOutcome {
    Written {
        data_file: PathBuf,
        stats_file: PathBuf,
        metadata: ShardMetadata,
    },
    /// The window starts past the last row of the table. Not an error.
    PastEnd { window: ShardWindow },
}

/// Window and query for one shard. Checks everything that can be checked
/// without touching the source, so bad arguments fail before connecting.
pub fn shard_query(config: &ExtractConfig, shard_index: u64) -> Result<PageQuery> {
    let window = ShardWindow::new(shard_index, config.page_size)?;
    PageQuery::new(config, window)
}

#[instrument(skip(source, config), fields(shard = shard_index))]
pub async fn extract_shard<S>(
    source: &S,
    config: &ExtractConfig,
    shard_index: u64,
) -> Result<ShardOutcome>
where
    S: TabularSource + ?Sized,
{
    let query = shard_query(config, shard_index)?;
    let window = query.window;
    info!(
        "Shard {}: extracting rows {} to {}",
        shard_index,
        window.offset,
        window.end()
    );

    let started = Instant::now();
    let rows = match source.fetch_page(&query).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(shard = shard_index, error = %e, "Query failed");
            return Err(e);
        }
    };
    let query_duration_seconds = started.elapsed().as_secs_f64();
    info!("Query completed in {:.2} seconds", query_duration_seconds);

    if rows.is_empty() {
        info!(
            "Shard {}: no data found at offset {} (past end of table)",
            shard_index, window.offset
        );
        return Ok(ShardOutcome::PastEnd { window });
    }

    let before = rows.len();
    let rows = dedup_rows(rows);
    if rows.len() != before {
        info!("Removed {} duplicates within shard", before - rows.len());
    }

    create_dir_all(&config.output_dir)?;
    let data_file = config.naming.path_in(&config.output_dir, shard_index);
    let stats_file = config.naming.stats_path_in(&config.output_dir, shard_index);
    let data_tmp = temp_path(&data_file);
    let stats_tmp = temp_path(&stats_file);

    let written = persist(&rows, window, query_duration_seconds, &data_tmp, &stats_tmp)
        .and_then(|metadata| {
            rename(&data_tmp, &data_file)?;
            Ok(metadata)
        });

    let metadata = match written {
        Ok(metadata) => metadata,
        Err(e) => {
            error!(shard = shard_index, error = %e, "Writing shard output failed");
            discard(&data_tmp);
            discard(&stats_tmp);
            return Err(e);
        }
    };

    if let Err(e) = rename(&stats_tmp, &stats_file) {
        error!(shard = shard_index, error = %e, "Moving stats file into place failed");
        discard(&stats_tmp);
        discard(&stats_file);
        return Err(e.into());
    }

    info!(
        "Shard {}: saved {} rows to {} ({:.2} MB)",
        shard_index,
        metadata.row_count,
        data_file.display(),
        metadata.file_size_mb()
    );

    Ok(ShardOutcome::Written {
        data_file,
        stats_file,
        metadata,
    })
}

fn persist(
    rows: &[NameRow],
    window: ShardWindow,
    query_duration_seconds: f64,
    data_tmp: &Path,
    stats_tmp: &Path,
) -> Result<ShardMetadata> {
    write_names_parquet(data_tmp, rows)?;

    let metadata = ShardMetadata {
        shard_index: window.shard_index,
        offset: window.offset,
        row_count: rows.len() as u64,
        unique_key_count: unique_keys(rows) as u64,
        file_size_bytes: std::fs::metadata(data_tmp)?.len(),
        query_duration_seconds,
        completed_at: Utc::now(),
    };
    std::fs::write(stats_tmp, metadata.render())?;
    Ok(metadata)
}

/// Drops repeated `(key, name)` pairs, keeping the first occurrence in order.
pub fn dedup_rows(rows: Vec<NameRow>) -> Vec<NameRow> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|row| seen.insert((row.user_id, row.fullname.clone())))
        .collect()
}

pub fn unique_keys(rows: &[NameRow]) -> usize {
    rows.iter().map(|row| row.user_id).collect::<HashSet<_>>().len()
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn discard(path: &Path) {
    if path.is_file() {
        if let Err(e) = remove_file(path) {
            warn!("Could not remove temporary file {}: {}", path.display(), e);
        }
    }
}
