use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use revelio_extractor::config::{PipelineConfig, SourceConfig};
use revelio_extractor::extract::shard_query;
use revelio_extractor::{extract_shard, layout, reconcile, Partitioner, PgSource, ShardOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "revelio_extractor")]
#[command(about = "Sharded Revelio name extraction: partition, extract, reconcile")]
struct Cli {
    /// JSON file overriding the built-in configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of parallel workers for local file work (default: all cores, at most 32)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the project directory layout and inspect the input CSV
    Init,

    /// Check that the remote extraction table is readable
    Check(SourceArgs),

    /// Split the input CSV into balanced batch files and verify them
    Partition {
        /// Input CSV (optionally .gz)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for batch files
        #[arg(short, long)]
        batch_dir: Option<PathBuf>,

        /// Number of batches
        #[arg(short = 'k', long)]
        batches: Option<usize>,
    },

    /// Extract one shard of names from the remote table
    Extract {
        /// 1-based shard index; the scheduler provides it as SGE_TASK_ID
        #[arg(env = "SGE_TASK_ID")]
        shard_index: u64,

        /// Rows per shard
        #[arg(short, long)]
        page_size: Option<u64>,

        /// Directory for shard outputs
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Audit extracted shards and report missing indices
    Reconcile {
        /// Directory holding shard outputs
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Number of shards that should exist
        #[arg(short, long)]
        expected: Option<u64>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Full connection URL, used instead of the configured host
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Database user (falls back to $USER)
    #[arg(long, env = "WRDS_USERNAME")]
    username: Option<String>,
}

async fn connect(config: &SourceConfig, args: SourceArgs) -> Result<PgSource> {
    let source = match args.database_url {
        Some(url) => PgSource::connect_url(&url, config).await?,
        None => {
            let config = SourceConfig {
                username: args
                    .username
                    .or_else(|| config.username.clone())
                    .or_else(|| std::env::var("USER").ok()),
                ..config.clone()
            };
            PgSource::connect(&config).await?
        }
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let max_workers = num_cpus::get();
    let num_workers = args.workers.unwrap_or_else(|| std::cmp::min(max_workers, 32));
    info!("Using {} workers (max available: {})", num_workers, max_workers);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|i| format!("revelio-worker-{}", i))
        .build_global()?;

    match args.command {
        Command::Init => {
            let created = layout::initialize(&config)?;
            info!("Created {} directories", created.len());
            layout::inspect_input(&config.partition.input_path)
                .context("inspecting input file")?;
        }

        Command::Check(source_args) => {
            let source = connect(&config.source, source_args)
                .await
                .context("connecting to remote database")?;
            source.ping().await.context("running test query")?;
            let sample = source
                .sample_row(&config.extract)
                .await
                .with_context(|| format!("reading {}", config.extract.table));
            source.close().await;
            match sample? {
                Some(row) => info!(
                    "Table {} readable, sample row: {} {:?}",
                    config.extract.table, row.user_id, row.fullname
                ),
                None => warn!("Table {} is readable but empty", config.extract.table),
            }
        }

        Command::Partition {
            input,
            batch_dir,
            batches,
        } => {
            if let Some(input) = input {
                config.partition.input_path = input;
            }
            if let Some(batch_dir) = batch_dir {
                config.partition.batch_dir = batch_dir;
            }
            if let Some(batches) = batches {
                config.partition.num_batches = batches;
            }

            let outcome = Partitioner::new(&config.partition)
                .run()
                .context("partitioning input")?;
            info!(
                "Batch generation complete: {} records in {} batches {:?}",
                outcome.verification.reloaded_rows,
                outcome.shard_files.len(),
                outcome.shard_sizes
            );
            info!("Summary: {}", outcome.summary_file.display());
        }

        Command::Extract {
            shard_index,
            page_size,
            output_dir,
            source,
        } => {
            if let Some(page_size) = page_size {
                config.extract.page_size = page_size;
            }
            if let Some(output_dir) = output_dir {
                config.extract.output_dir = output_dir;
            }

            shard_query(&config.extract, shard_index)
                .with_context(|| format!("shard {shard_index}: invalid request"))?;
            let remote = connect(&config.source, source)
                .await
                .with_context(|| format!("shard {shard_index}: connecting to remote database"))?;
            let outcome = extract_shard(&remote, &config.extract, shard_index).await;
            remote.close().await;

            match outcome.with_context(|| format!("shard {shard_index} failed"))? {
                ShardOutcome::Written { data_file, .. } => {
                    info!("Shard {} complete: {}", shard_index, data_file.display());
                }
                ShardOutcome::PastEnd { .. } => {
                    info!("Shard {} complete: nothing to extract", shard_index);
                }
            }
        }

        Command::Reconcile {
            output_dir,
            expected,
        } => {
            if let Some(output_dir) = output_dir {
                config.reconcile.output_dir = output_dir;
            }
            if let Some(expected) = expected {
                config.reconcile.expected_shards = expected;
            }

            let report = reconcile(&config.reconcile).context("reconciling shard outputs")?;
            if !report.complete {
                warn!("EXTRACTION INCOMPLETE - shards missing or stats unreadable");
                return Ok(ExitCode::FAILURE);
            }
            info!("EXTRACTION COMPLETE - all shards present");
        }
    }

    Ok(ExitCode::SUCCESS)
}
