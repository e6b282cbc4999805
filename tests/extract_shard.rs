//! Offset-window extraction against an in-memory source.

use revelio_extractor::columnar::read_names_parquet;
use revelio_extractor::config::ExtractConfig;
use revelio_extractor::metadata::ShardStats;
use revelio_extractor::{extract_shard, MemorySource, NameRow, PipelineError, ShardOutcome};
use std::path::Path;
use tempfile::tempdir;

fn names(n: i64) -> Vec<NameRow> {
    (1..=n).map(|i| NameRow::new(i, format!("Person {i:03}"))).collect()
}

fn config_in(dir: &Path, page_size: u64) -> ExtractConfig {
    ExtractConfig {
        output_dir: dir.join("name_batches"),
        page_size,
        ..ExtractConfig::default()
    }
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn shard_three_reads_offset_twenty() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);
    let source = MemorySource::new(names(35));

    let outcome = extract_shard(&source, &config, 3).await?;
    let ShardOutcome::Written {
        data_file,
        stats_file,
        metadata,
    } = outcome
    else {
        panic!("expected shard output");
    };

    assert_eq!(data_file, config.output_dir.join("batch_0003.parquet"));
    assert_eq!(stats_file, config.output_dir.join("batch_0003_stats.txt"));
    assert_eq!(metadata.offset, 20);
    assert_eq!(metadata.row_count, 10);
    assert_eq!(metadata.unique_key_count, 10);
    assert_eq!(metadata.file_size_bytes, std::fs::metadata(&data_file)?.len());

    let rows = read_names_parquet(&data_file)?;
    assert_eq!(rows.first().map(|r| r.user_id), Some(21));
    assert_eq!(rows.last().map(|r| r.user_id), Some(30));

    let stats = ShardStats::read(&stats_file)?;
    assert_eq!(stats.task_id, Some(3));
    assert_eq!(stats.offset, Some(20));
    assert_eq!(stats.rows, Some(10));

    // no temporary files left behind
    assert_eq!(
        entries(&config.output_dir),
        vec!["batch_0003.parquet", "batch_0003_stats.txt"]
    );
    Ok(())
}

#[tokio::test]
async fn consecutive_shards_cover_table_without_overlap() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);
    let source = MemorySource::new(names(35));

    let mut all = Vec::new();
    for shard in 1..=5 {
        match extract_shard(&source, &config, shard).await? {
            ShardOutcome::Written { data_file, .. } => all.extend(read_names_parquet(&data_file)?),
            ShardOutcome::PastEnd { window } => assert_eq!(window.offset, 40),
        }
    }
    assert_eq!(all, names(35));
    Ok(())
}

#[tokio::test]
async fn empty_page_writes_nothing_and_succeeds() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);
    let source = MemorySource::new(names(20));

    let outcome = extract_shard(&source, &config, 3).await?;
    match outcome {
        ShardOutcome::PastEnd { window } => {
            assert_eq!(window.shard_index, 3);
            assert_eq!(window.offset, 20);
        }
        other => panic!("expected past-end, got {other:?}"),
    }
    assert!(entries(&config.output_dir).is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicates_within_page_are_removed() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);
    let mut rows = names(4);
    rows.push(NameRow::new(2, "Person 002"));
    rows.push(NameRow::new(2, "P. Two"));
    let source = MemorySource::new(rows);

    let ShardOutcome::Written { metadata, data_file, .. } =
        extract_shard(&source, &config, 1).await?
    else {
        panic!("expected shard output");
    };
    assert_eq!(metadata.row_count, 5);
    assert_eq!(metadata.unique_key_count, 4);
    assert_eq!(read_names_parquet(&data_file)?.len(), 5);
    Ok(())
}

#[tokio::test]
async fn failed_query_keeps_previous_output() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);

    let ShardOutcome::Written { data_file, stats_file, .. } =
        extract_shard(&MemorySource::new(names(30)), &config, 2).await?
    else {
        panic!("expected shard output");
    };
    let data_before = std::fs::read(&data_file)?;
    let stats_before = std::fs::read(&stats_file)?;

    let err = extract_shard(&MemorySource::failing(), &config, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Query(_)));

    assert_eq!(std::fs::read(&data_file)?, data_before);
    assert_eq!(std::fs::read(&stats_file)?, stats_before);
    assert_eq!(entries(&config.output_dir).len(), 2);
    Ok(())
}

#[tokio::test]
async fn failed_first_run_leaves_no_output() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);

    assert!(extract_shard(&MemorySource::failing(), &config, 1).await.is_err());
    assert!(!config.naming.path_in(&config.output_dir, 1).exists());
    Ok(())
}

#[tokio::test]
async fn rerun_overwrites_output() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);

    extract_shard(&MemorySource::new(names(15)), &config, 2).await?;
    let ShardOutcome::Written { data_file, metadata, .. } =
        extract_shard(&MemorySource::new(names(30)), &config, 2).await?
    else {
        panic!("expected shard output");
    };
    assert_eq!(metadata.row_count, 10);
    assert_eq!(read_names_parquet(&data_file)?.len(), 10);
    Ok(())
}

#[tokio::test]
async fn shard_index_zero_is_rejected() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path(), 10);
    let err = extract_shard(&MemorySource::new(names(5)), &config, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidShardIndex(0)));
}

#[tokio::test]
async fn stats_move_failure_leaves_no_temp_files() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path(), 10);

    let ShardOutcome::Written { stats_file, .. } =
        extract_shard(&MemorySource::new(names(15)), &config, 2).await?
    else {
        panic!("expected shard output");
    };
    // a directory in the sidecar's place makes the final rename fail
    std::fs::remove_file(&stats_file)?;
    std::fs::create_dir(&stats_file)?;

    let err = extract_shard(&MemorySource::new(names(30)), &config, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Io(_)));

    // data is renamed before the sidecar, so it is already the new run's
    let data_file = config.naming.path_in(&config.output_dir, 2);
    assert_eq!(read_names_parquet(&data_file)?.len(), 10);
    assert_eq!(
        entries(&config.output_dir),
        vec!["batch_0002.parquet", "batch_0002_stats.txt"]
    );
    assert!(stats_file.is_dir());
    Ok(())
}
