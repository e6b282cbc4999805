//! Shard sidecar metadata.
//!
//! Each extracted shard gets a `<stem>_stats.txt` file of `key: value` lines
//! next to its data file. Sidecars are written once and never updated.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub shard_index: u64,
    pub offset: u64,
    pub row_count: u64,
    pub unique_key_count: u64,
    pub file_size_bytes: u64,
    pub query_duration_seconds: f64,
    pub completed_at: DateTime<Utc>,
}

impl ShardMetadata {
    pub fn file_size_mb(&self) -> f64 {
        self.file_size_bytes as f64 / BYTES_PER_MB
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "task_id: {}", self.shard_index);
        let _ = writeln!(out, "offset: {}", self.offset);
        let _ = writeln!(out, "rows: {}", self.row_count);
        let _ = writeln!(out, "unique_users: {}", self.unique_key_count);
        let _ = writeln!(out, "file_size_bytes: {}", self.file_size_bytes);
        let _ = writeln!(out, "file_size_mb: {:.2}", self.file_size_mb());
        let _ = writeln!(out, "query_time_seconds: {:.2}", self.query_duration_seconds);
        let _ = writeln!(
            out,
            "extraction_time: {}",
            self.completed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        out
    }
}

/// Sidecar contents as read back. Keys may be missing, including in files
/// written by older runs that only recorded `file_size_mb`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardStats {
    pub task_id: Option<u64>,
    pub offset: Option<u64>,
    pub rows: Option<u64>,
    pub unique_users: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub query_time_seconds: Option<f64>,
    pub extraction_time: Option<String>,
}

impl ShardStats {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    /// Unknown keys and lines without a colon are skipped; a known key with
    /// an unparsable value is an error.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut stats = Self::default();
        let mut size_mb: Option<f64> = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "task_id" => stats.task_id = Some(parse_value(key, value, path)?),
                "offset" => stats.offset = Some(parse_value(key, value, path)?),
                "rows" => stats.rows = Some(parse_value(key, value, path)?),
                "unique_users" => stats.unique_users = Some(parse_value(key, value, path)?),
                "file_size_bytes" => {
                    stats.file_size_bytes = Some(parse_value(key, value, path)?)
                }
                "file_size_mb" => size_mb = Some(parse_value(key, value, path)?),
                "query_time_seconds" => {
                    stats.query_time_seconds = Some(parse_value(key, value, path)?)
                }
                "extraction_time" => stats.extraction_time = Some(value.to_string()),
                _ => {}
            }
        }

        if stats.file_size_bytes.is_none() {
            stats.file_size_bytes = size_mb.map(|mb| (mb * BYTES_PER_MB).round() as u64);
        }
        Ok(stats)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str, path: &Path) -> Result<T> {
    value.parse().map_err(|_| PipelineError::MalformedStats {
        path: path.to_path_buf(),
        detail: format!("{key}: {value:?}"),
    })
}
