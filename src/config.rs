//! Pipeline configuration.
//!
//! One immutable [`PipelineConfig`] is built in `main` (defaults, then an
//! optional JSON file, then CLI flags) and handed to each stage by reference.

use crate::error::{PipelineError, Result};
use crate::naming::ShardNaming;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// WRDS caps concurrent jobs per user at five.
pub const DEFAULT_NUM_BATCHES: usize = 5;
pub const DEFAULT_PAGE_SIZE: u64 = 10_000_000;
pub const DEFAULT_EXPECTED_SHARDS: u64 = 65;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub layout: LayoutConfig,
    pub partition: PartitionConfig,
    pub extract: ExtractConfig,
    pub reconcile: ReconcileConfig,
    pub source: SourceConfig,
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Small, backed-up project data (inputs, batch lists, unmatched lists).
    pub data_dir: PathBuf,
    /// Large intermediate outputs and logs.
    pub scratch_dir: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            scratch_dir: PathBuf::from("scratch"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub input_path: PathBuf,
    pub batch_dir: PathBuf,
    pub num_batches: usize,
    pub naming: ShardNaming,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/ceo_names_companies.csv"),
            batch_dir: PathBuf::from("data/batches"),
            num_batches: DEFAULT_NUM_BATCHES,
            naming: ShardNaming::partition_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub output_dir: PathBuf,
    pub page_size: u64,
    pub table: String,
    /// Stable ordering key; pagination windows are only disjoint because of it.
    pub key_column: String,
    pub name_column: String,
    pub naming: ShardNaming,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("scratch/name_batches"),
            page_size: DEFAULT_PAGE_SIZE,
            table: "revelio.individual_user".to_string(),
            key_column: "user_id".to_string(),
            name_column: "fullname".to_string(),
            naming: ShardNaming::extraction_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub output_dir: PathBuf,
    pub expected_shards: u64,
    pub naming: ShardNaming,
    /// Scheduler script named in the re-submission hint.
    pub resubmit_script: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("scratch/name_batches"),
            expected_shards: DEFAULT_EXPECTED_SHARDS,
            naming: ShardNaming::extraction_default(),
            resubmit_script: "extract_all_names.sh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Falls back to `WRDS_USERNAME`, then `USER`, at connect time.
    pub username: Option<String>,
    pub connect_timeout_secs: u64,
    pub max_connections: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: "wrds-pgdata.wharton.upenn.edu".to_string(),
            port: 9737,
            database: "wrds".to_string(),
            username: None,
            connect_timeout_secs: 30,
            max_connections: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_deployment() {
        let config = PipelineConfig::default();
        assert_eq!(config.partition.num_batches, 5);
        assert_eq!(config.extract.page_size, 10_000_000);
        assert_eq!(config.reconcile.expected_shards, 65);
        assert_eq!(config.extract.output_dir, config.reconcile.output_dir);
        assert_eq!(config.extract.naming, config.reconcile.naming);
    }

    #[test]
    fn test_partial_json_overrides_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{ "extract": {{ "page_size": 500 }}, "reconcile": {{ "expected_shards": 3 }} }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.extract.page_size, 500);
        assert_eq!(config.extract.table, "revelio.individual_user");
        assert_eq!(config.reconcile.expected_shards, 3);
        assert_eq!(config.partition.num_batches, DEFAULT_NUM_BATCHES);
    }

    #[test]
    fn test_missing_config_file_is_typed_error() {
        let err = PipelineConfig::from_json_file(Path::new("/nonexistent/pipeline.json"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound(_)));
    }
}
