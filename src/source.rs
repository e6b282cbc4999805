//! Remote tabular data source.
//!
//! The extractor only needs one operation from the source: a deterministically
//! ordered page `(order key, page size, offset) -> rows`. Pages for different
//! shards are disjoint only if repeated queries see the same order, which the
//! source is trusted, not checked, to provide.

use crate::config::{ExtractConfig, SourceConfig};
use crate::error::{PipelineError, Result};
use crate::window::ShardWindow;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

/// One extracted profile name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameRow {
    pub user_id: i64,
    pub fullname: String,
}

impl NameRow {
    pub fn new(user_id: i64, fullname: impl Into<String>) -> Self {
        Self {
            user_id,
            fullname: fullname.into(),
        }
    }
}

/// A paged, ordered read of `(key, name)` pairs from one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub table: String,
    pub key_column: String,
    pub name_column: String,
    pub window: ShardWindow,
}

impl PageQuery {
    pub fn new(config: &ExtractConfig, window: ShardWindow) -> Result<Self> {
        check_identifier(&config.table, 2)?;
        check_identifier(&config.key_column, 1)?;
        check_identifier(&config.name_column, 1)?;
        Ok(Self {
            table: config.table.clone(),
            key_column: config.key_column.clone(),
            name_column: config.name_column.clone(),
            window,
        })
    }

    /// Query text with `$1` = limit and `$2` = offset. The name column joins
    /// the key in ORDER BY so rows sharing a key keep a fixed position too.
    pub fn sql(&self) -> String {
        format!(
            "SELECT DISTINCT {key}, {name}\n\
             FROM {table}\n\
             WHERE {name} IS NOT NULL\n\
             ORDER BY {key}, {name}\n\
             LIMIT $1\n\
             OFFSET $2",
            key = self.key_column,
            name = self.name_column,
            table = self.table,
        )
    }

    fn bind_values(&self) -> Result<(i64, i64)> {
        let overflow = || PipelineError::OffsetOverflow {
            shard_index: self.window.shard_index,
            page_size: self.window.page_size,
        };
        let limit = i64::try_from(self.window.page_size).map_err(|_| overflow())?;
        let offset = i64::try_from(self.window.offset).map_err(|_| overflow())?;
        Ok((limit, offset))
    }
}

/// Single-row read of the extraction table, used to confirm the table is
/// readable before any shard job is launched.
pub fn sample_sql(config: &ExtractConfig) -> Result<String> {
    check_identifier(&config.table, 2)?;
    check_identifier(&config.key_column, 1)?;
    check_identifier(&config.name_column, 1)?;
    Ok(format!(
        "SELECT {key}, {name}\n\
         FROM {table}\n\
         LIMIT 1",
        key = config.key_column,
        name = config.name_column,
        table = config.table,
    ))
}

/// Plain identifiers only, optionally qualified up to `max_parts` deep
/// (`schema.table`). Identifiers are spliced into SQL, so nothing else passes.
fn check_identifier(ident: &str, max_parts: usize) -> Result<()> {
    let parts: Vec<&str> = ident.split('.').collect();
    let valid_part = |part: &&str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if parts.len() > max_parts || !parts.iter().all(valid_part) {
        return Err(PipelineError::UnsafeIdentifier(ident.to_string()));
    }
    Ok(())
}

#[async_trait]
pub trait TabularSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<NameRow>>;
}

// ====== POSTGRES (WRDS) ======

pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    /// Connects with explicit host settings. The password is left to the
    /// driver, which reads `PGPASSWORD` or `~/.pgpass`.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database);
        if let Some(username) = &config.username {
            options = options.username(username);
        }

        info!(
            "Connecting to {}:{}/{} as {}",
            config.host,
            config.port,
            config.database,
            config.username.as_deref().unwrap_or("<driver default>")
        );
        let pool = Self::pool_options(config).connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn connect_url(url: &str, config: &SourceConfig) -> Result<Self> {
        info!("Connecting with DATABASE_URL");
        let pool = Self::pool_options(config).connect(url).await?;
        Ok(Self { pool })
    }

    fn pool_options(config: &SourceConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
    }

    pub async fn ping(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        debug!("Ping returned {}", one);
        Ok(())
    }

    /// Reads one row of the configured table. `None` means the table is
    /// readable but empty.
    pub async fn sample_row(&self, config: &ExtractConfig) -> Result<Option<NameRow>> {
        let sql = sample_sql(config)?;
        debug!("Executing sample query:\n{}", sql);
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.map(|row| -> Result<NameRow> {
            Ok(NameRow {
                user_id: row.try_get(0)?,
                fullname: row.try_get(1)?,
            })
        })
        .transpose()
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TabularSource for PgSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<NameRow>> {
        let (limit, offset) = query.bind_values()?;
        let sql = query.sql();
        debug!("Executing query:\n{}", sql);

        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<NameRow> {
                Ok(NameRow {
                    user_id: row.try_get(0)?,
                    fullname: row.try_get(1)?,
                })
            })
            .collect()
    }
}

// ====== IN-MEMORY ======

/// Table held in memory, served in `(key, name)` order. Rows are returned as
/// stored, so duplicates reach the caller just as a misbehaving remote page
/// would deliver them.
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Vec<NameRow>,
    fail: bool,
}

impl MemorySource {
    pub fn new(mut rows: Vec<NameRow>) -> Self {
        rows.sort();
        Self { rows, fail: false }
    }

    /// A source whose every query fails as if the connection dropped.
    pub fn failing() -> Self {
        Self {
            rows: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl TabularSource for MemorySource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<NameRow>> {
        if self.fail {
            return Err(PipelineError::Query(sqlx::Error::PoolTimedOut));
        }
        let start = usize::try_from(query.window.offset).unwrap_or(usize::MAX);
        let len = usize::try_from(query.window.page_size).unwrap_or(usize::MAX);
        Ok(self
            .rows
            .iter()
            .skip(start)
            .take(len)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(shard_index: u64, page_size: u64) -> PageQuery {
        let window = ShardWindow::new(shard_index, page_size).unwrap();
        PageQuery::new(&ExtractConfig::default(), window).unwrap()
    }

    #[test]
    fn test_sql_orders_and_pages() {
        let sql = query(3, 10).sql();
        assert!(sql.starts_with("SELECT DISTINCT user_id, fullname"));
        assert!(sql.contains("FROM revelio.individual_user"));
        assert!(sql.contains("WHERE fullname IS NOT NULL"));
        assert!(sql.contains("ORDER BY user_id, fullname"));
        assert!(sql.contains("LIMIT $1"));
        assert!(sql.contains("OFFSET $2"));
    }

    #[test]
    fn test_bind_values_follow_window() {
        assert_eq!(query(3, 10).bind_values().unwrap(), (10, 20));
        assert_eq!(query(1, 10_000_000).bind_values().unwrap(), (10_000_000, 0));
    }

    #[test]
    fn test_bind_values_reject_values_beyond_bigint() {
        let q = query(3, 1u64 << 62);
        assert!(matches!(
            q.bind_values().unwrap_err(),
            PipelineError::OffsetOverflow { .. }
        ));
    }

    #[test]
    fn test_identifiers_are_checked() {
        assert!(check_identifier("revelio.individual_user", 2).is_ok());
        assert!(check_identifier("_col1", 1).is_ok());
        assert!(check_identifier("a.b.c", 2).is_err());
        assert!(check_identifier("user_id; DROP TABLE x", 1).is_err());
        assert!(check_identifier("1abc", 1).is_err());
        assert!(check_identifier("", 1).is_err());
        assert!(check_identifier("schema.", 2).is_err());

        let config = ExtractConfig {
            key_column: "user_id--".to_string(),
            ..ExtractConfig::default()
        };
        let window = ShardWindow::new(1, 10).unwrap();
        assert!(matches!(
            PageQuery::new(&config, window).unwrap_err(),
            PipelineError::UnsafeIdentifier(_)
        ));
    }

    #[test]
    fn test_sample_reads_one_row_of_configured_table() {
        let sql = sample_sql(&ExtractConfig::default()).unwrap();
        assert_eq!(
            sql,
            "SELECT user_id, fullname\nFROM revelio.individual_user\nLIMIT 1"
        );

        let config = ExtractConfig {
            table: "revelio.individual_user; --".to_string(),
            ..ExtractConfig::default()
        };
        assert!(matches!(
            sample_sql(&config).unwrap_err(),
            PipelineError::UnsafeIdentifier(_)
        ));
    }

    #[tokio::test]
    async fn test_memory_source_pages_in_key_order() {
        let rows = (0..25).rev().map(|i| NameRow::new(i, format!("n{i}")));
        let source = MemorySource::new(rows.collect());

        let page = source.fetch_page(&query(3, 10)).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].user_id, 20);

        let past_end = source.fetch_page(&query(4, 10)).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_failing_source_reports_query_error() {
        let err = MemorySource::failing()
            .fetch_page(&query(1, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Query(_)));
    }
}
