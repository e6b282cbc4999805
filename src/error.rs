use std::path::PathBuf;

/// Errors raised by the partition, extraction and reconciliation stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Progress template error: {0}")]
    Template(#[from] indicatif::style::TemplateError),

    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Shard count must be at least 1, got {0}")]
    InvalidShardCount(usize),

    #[error("Shard index must be at least 1, got {0}")]
    InvalidShardIndex(u64),

    #[error("Page size must be at least 1, got {0}")]
    InvalidPageSize(u64),

    #[error("Offset overflows for shard {shard_index} with page size {page_size}")]
    OffsetOverflow { shard_index: u64, page_size: u64 },

    #[error("Unsafe SQL identifier: {0:?}")]
    UnsafeIdentifier(String),

    #[error("Malformed stats file {}: {detail}", .path.display())]
    MalformedStats { path: PathBuf, detail: String },

    #[error("Partition integrity check failed: {0}")]
    PartitionIntegrity(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = PipelineError::OffsetOverflow {
            shard_index: 3,
            page_size: u64::MAX,
        };
        assert!(err.to_string().contains("shard 3"));

        let err = PipelineError::InputNotFound(PathBuf::from("data/ceos.csv"));
        assert_eq!(err.to_string(), "Input file not found: data/ceos.csv");
    }
}
