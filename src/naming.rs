//! Shard file naming.
//!
//! Every shard file is named `<prefix>_<index><suffix>.<ext>` with the index
//! zero-padded to a fixed width, so a directory listing alone recovers which
//! shards exist. The metadata sidecar of a shard shares its stem and adds
//! `_stats.txt`. A shard whose file is absent has either not run yet or
//! failed; nothing else records shard state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STATS_SUFFIX: &str = "_stats.txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardNaming {
    pub prefix: String,
    /// Text between the index and the extension, e.g. `_ceos`.
    pub suffix: String,
    pub extension: String,
    pub width: usize,
}

impl ShardNaming {
    /// `batch_01_ceos.csv` style input shards written by the partitioner.
    pub fn partition_default() -> Self {
        Self {
            prefix: "batch".to_string(),
            suffix: "_ceos".to_string(),
            extension: "csv".to_string(),
            width: 2,
        }
    }

    /// `batch_0001.parquet` style outputs written by the extractor.
    pub fn extraction_default() -> Self {
        Self {
            prefix: "batch".to_string(),
            suffix: String::new(),
            extension: "parquet".to_string(),
            width: 4,
        }
    }

    pub fn stem(&self, index: u64) -> String {
        format!(
            "{}_{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.width
        )
    }

    pub fn file_name(&self, index: u64) -> String {
        format!("{}.{}", self.stem(index), self.extension)
    }

    pub fn stats_file_name(&self, index: u64) -> String {
        format!("{}{}", self.stem(index), STATS_SUFFIX)
    }

    pub fn path_in(&self, dir: &Path, index: u64) -> PathBuf {
        dir.join(self.file_name(index))
    }

    pub fn stats_path_in(&self, dir: &Path, index: u64) -> PathBuf {
        dir.join(self.stats_file_name(index))
    }

    /// Glob matching every shard file of this convention inside `dir`.
    pub fn data_glob(&self, dir: &Path) -> String {
        format!(
            "{}/{}_*{}.{}",
            escaped(dir),
            self.prefix,
            self.suffix,
            self.extension
        )
    }

    /// Glob matching every stats sidecar of this convention inside `dir`.
    pub fn stats_glob(&self, dir: &Path) -> String {
        format!(
            "{}/{}_*{}{}",
            escaped(dir),
            self.prefix,
            self.suffix,
            STATS_SUFFIX
        )
    }

    /// Recovers the shard index from a data file name. Any padding width is
    /// accepted; anything else between prefix and suffix rejects the name.
    pub fn parse_index(&self, file_name: &str) -> Option<u64> {
        let rest = file_name.strip_prefix(&self.prefix)?.strip_prefix('_')?;
        let rest = rest
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;
        let digits = rest.strip_suffix(self.suffix.as_str())?;
        parse_digits(digits)
    }

    /// Recovers the shard index from a stats sidecar file name.
    pub fn parse_stats_index(&self, file_name: &str) -> Option<u64> {
        let rest = file_name.strip_prefix(&self.prefix)?.strip_prefix('_')?;
        let rest = rest.strip_suffix(STATS_SUFFIX)?;
        let digits = rest.strip_suffix(self.suffix.as_str())?;
        parse_digits(digits)
    }
}

fn escaped(dir: &Path) -> String {
    glob::Pattern::escape(&dir.display().to_string())
}

fn parse_digits(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_names_are_two_digit() {
        let naming = ShardNaming::partition_default();
        assert_eq!(naming.file_name(1), "batch_01_ceos.csv");
        assert_eq!(naming.file_name(12), "batch_12_ceos.csv");
        assert_eq!(naming.stats_file_name(3), "batch_03_ceos_stats.txt");
    }

    #[test]
    fn test_extraction_names_are_four_digit() {
        let naming = ShardNaming::extraction_default();
        assert_eq!(naming.file_name(7), "batch_0007.parquet");
        assert_eq!(naming.stats_file_name(65), "batch_0065_stats.txt");
    }

    #[test]
    fn test_parse_index() {
        let naming = ShardNaming::extraction_default();
        assert_eq!(naming.parse_index("batch_0042.parquet"), Some(42));
        // wider than the configured padding still parses
        assert_eq!(naming.parse_index("batch_12345.parquet"), Some(12345));
        assert_eq!(naming.parse_index("batch_0042_stats.txt"), None);
        assert_eq!(naming.parse_index("batch_.parquet"), None);
        assert_eq!(naming.parse_index("batch_00a1.parquet"), None);
        assert_eq!(naming.parse_index("other_0001.parquet"), None);
        assert_eq!(naming.parse_index(".batch_0001.parquet.tmp"), None);

        let naming = ShardNaming::partition_default();
        assert_eq!(naming.parse_index("batch_05_ceos.csv"), Some(5));
        assert_eq!(naming.parse_index("batch_05.csv"), None);
    }

    #[test]
    fn test_parse_stats_index() {
        let naming = ShardNaming::extraction_default();
        assert_eq!(naming.parse_stats_index("batch_0003_stats.txt"), Some(3));
        assert_eq!(naming.parse_stats_index("batch_0003.parquet"), None);
    }

    #[test]
    fn test_globs() {
        let naming = ShardNaming::extraction_default();
        let dir = Path::new("/scratch/names");
        assert_eq!(naming.data_glob(dir), "/scratch/names/batch_*.parquet");
        assert_eq!(naming.stats_glob(dir), "/scratch/names/batch_*_stats.txt");

        let odd = Path::new("/scratch/run[1]");
        assert_eq!(naming.data_glob(odd), "/scratch/run[[]1[]]/batch_*.parquet");
    }
}
