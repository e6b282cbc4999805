//! Sharded extraction of profile names from a remote academic database.
//!
//! Three stages share one idea, a deterministic split of an ordered ID space
//! into shards that independent workers process and that are reconciled
//! afterwards:
//!
//! - [`partition`] splits an input record list into balanced batch files and
//!   verifies the split by reloading them.
//! - [`extract`] pulls one `LIMIT/OFFSET` window of the remote table per
//!   shard index and writes it as Parquet with a stats sidecar.
//! - [`reconcile`] audits the output directory for missing shards.

pub mod columnar;
pub mod config;
pub mod error;
pub mod extract;
pub mod layout;
pub mod metadata;
pub mod naming;
pub mod partition;
mod progress;
pub mod reconcile;
pub mod source;
pub mod table;
pub mod window;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use extract::{extract_shard, ShardOutcome};
pub use partition::{partition, verify_shards, Partitioner};
pub use reconcile::{reconcile, ReconciliationReport};
pub use source::{MemorySource, NameRow, PgSource, TabularSource};
pub use window::ShardWindow;
