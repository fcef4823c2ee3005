//! SQLite persistence for the queue.
//!
//! One [`Database`] owns the connection pool and is handed to each store by
//! constructor. Timestamps are stored as fixed-width RFC 3339 text with
//! nanosecond precision, so `ORDER BY` on the text column is chronological.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CrawlerError, Result};

pub mod checkpoint_store;
pub mod link_store;
pub mod task_store;

pub use checkpoint_store::SqliteCheckpointStore;
pub use link_store::SqliteLinkStore;
pub use task_store::SqliteTaskStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owned handle to the queue database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// # Example URLs
    /// - `sqlite://data/crawler.db` - file-based
    /// - `sqlite::memory:` - ephemeral, single connection
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database (for testing).
    ///
    /// Every pooled connection to `:memory:` would get its own empty database,
    /// so the pool is pinned to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Encode a timestamp as sortable text (`2024-01-01T00:00:00.000000000Z`).
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_ts(field: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| CrawlerError::invalid_value(field, raw))
}

pub(crate) fn decode_opt_ts(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| decode_ts(field, value)).transpose()
}
