use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::table::Table;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Every directory the pipeline reads from or writes to.
pub fn directories(config: &PipelineConfig) -> Vec<PathBuf> {
    let data = &config.layout.data_dir;
    let scratch = &config.layout.scratch_dir;
    let mut dirs = vec![
        data.clone(),
        config.partition.batch_dir.clone(),
        data.join("unmatched"),
        scratch.clone(),
        scratch.join("extracted"),
        scratch.join("combined"),
        scratch.join("logs"),
        config.extract.output_dir.clone(),
        config.reconcile.output_dir.clone(),
    ];
    dirs.sort();
    dirs.dedup();
    dirs
}

/// Creates the directory layout. Returns the directories that did not exist
/// before; running it again creates nothing.
pub fn initialize(config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for dir in directories(config) {
        if dir.is_dir() {
            info!("Verified {}", dir.display());
            continue;
        }
        create_dir_all(&dir)?;
        info!("Created {}", dir.display());
        created.push(dir);
    }
    Ok(created)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSummary {
    pub path: PathBuf,
    pub records: usize,
    pub headers: Vec<String>,
}

/// Loads the input CSV and reports its size and columns. An absent file is
/// logged and gives `None`; it may simply not have been copied in yet.
pub fn inspect_input(path: &Path) -> Result<Option<InputSummary>> {
    let table = match Table::load_csv(path) {
        Ok(table) => table,
        Err(PipelineError::InputNotFound(_)) => {
            warn!("Input file not found: {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    info!("Input file: {}", path.display());
    info!("  Records: {}", table.len());
    info!("  Columns: {}", table.headers.join(", "));
    Ok(Some(InputSummary {
        path: path.to_path_buf(),
        records: table.len(),
        headers: table.headers,
    }))
}
