use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

use super::Database;
use crate::error::{CrawlerError, Result};
use crate::traits::CheckpointStore;
use crate::types::Checkpoint;

const CHECKPOINT_COLUMNS: &str =
    "checkpoint_id, timestamp, task_id, processed_count, error_count, metadata";

/// SQLite-backed checkpoint table.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn insert(&self, checkpoint: &Checkpoint) -> Result<()> {
        let metadata = serde_json::to_string(&checkpoint.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints
                (checkpoint_id, timestamp, task_id, processed_count, error_count, metadata)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&checkpoint.checkpoint_id)
        .bind(&checkpoint.timestamp)
        .bind(checkpoint.task_id.map(|id| id.to_string()))
        .bind(to_i64("processed_count", checkpoint.processed_count)?)
        .bind(to_i64("error_count", checkpoint.error_count)?)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE checkpoint_id = ?"
        ))
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    async fn latest(&self) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints \
             ORDER BY timestamp DESC, rowid DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints ORDER BY timestamp DESC, rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE checkpoint_id = ?")
            .bind(checkpoint_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune(&self, keep: usize) -> Result<u64> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            DELETE FROM checkpoints
            WHERE checkpoint_id NOT IN (
                SELECT checkpoint_id FROM checkpoints
                ORDER BY timestamp DESC, rowid DESC
                LIMIT ?
            )
            "#,
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, FromRow)]
struct CheckpointRow {
    checkpoint_id: String,
    timestamp: String,
    task_id: Option<String>,
    processed_count: i64,
    error_count: i64,
    metadata: String,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            checkpoint_id: self.checkpoint_id,
            timestamp: self.timestamp,
            task_id: self.task_id.map(|id| id.parse()).transpose()?,
            processed_count: to_u64("processed_count", self.processed_count)?,
            error_count: to_u64("error_count", self.error_count)?,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

fn to_i64(field: &'static str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| CrawlerError::invalid_value(field, value.to_string()))
}

fn to_u64(field: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| CrawlerError::invalid_value(field, value.to_string()))
}
