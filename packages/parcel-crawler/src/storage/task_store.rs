use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::{debug, warn};

use super::{decode_opt_ts, decode_ts, encode_ts, Database};
use crate::error::{CrawlerError, Result};
use crate::traits::TaskStore;
use crate::types::*;

/// Claim attempts per `claim_next` call before giving up on a contended queue.
pub const MAX_CLAIM_ROUNDS: usize = 16;

const TASK_COLUMNS: &str = "id, url, platform, status, priority, created_at, started_at, \
     completed_at, result_path, error, retry_count, discovered_links_count";

/// SQLite-backed task queue.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    async fn fetch_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn best_candidate(&self, platform: Option<&str>) -> Result<Option<String>> {
        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT id FROM tasks WHERE status = 'pending'");
        if let Some(platform) = platform {
            query.push(" AND platform = ").push_bind(platform);
        }
        query.push(" ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT 1");

        let row: Option<(String,)> = query.build_query_as().fetch_optional(&self.pool).await?;
        Ok(row.map(|(id,)| id))
    }

    /// Compare-and-swap Pending -> Processing. `None` when the row moved on.
    async fn try_claim(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET status = 'processing', started_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(encode_ts(Utc::now()))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// Explain why a guarded update touched no rows.
    async fn conflict(&self, id: TaskId, to: TaskStatus) -> CrawlerError {
        match self.fetch_task(&id.to_string()).await {
            Ok(task) => classify_conflict(id, task.map(|task| task.status), to),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn add(&self, task: NewTask) -> Result<TaskId> {
        let id = task.id.unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO tasks (id, url, platform, status, priority, created_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&task.url)
        .bind(&task.platform)
        .bind(task.priority)
        .bind(encode_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        debug!(task_id = %id, url = %task.url, priority = task.priority, "task added");
        Ok(id)
    }

    async fn claim_next(&self, platform: Option<&str>) -> Result<Option<Task>> {
        for round in 0..MAX_CLAIM_ROUNDS {
            let Some(candidate) = self.best_candidate(platform).await? else {
                return Ok(None);
            };

            if let Some(task) = self.try_claim(&candidate).await? {
                debug!(
                    task_id = %task.id,
                    platform = %task.platform,
                    priority = task.priority,
                    "task claimed"
                );
                return Ok(Some(task));
            }

            debug!(task_id = %candidate, round, "lost claim race, reselecting");
        }

        warn!(
            rounds = MAX_CLAIM_ROUNDS,
            platform = platform.unwrap_or("*"),
            "claim rounds exhausted under contention"
        );
        Ok(None)
    }

    async fn claim(&self, id: TaskId) -> Result<bool> {
        Ok(self.try_claim(&id.to_string()).await?.is_some())
    }

    async fn complete(
        &self,
        id: TaskId,
        result_path: &str,
        discovered_links_count: u32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', completed_at = ?, result_path = ?,
                discovered_links_count = ?, error = NULL
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(encode_ts(Utc::now()))
        .bind(result_path)
        .bind(i64::from(discovered_links_count))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.conflict(id, TaskStatus::Completed).await);
        }
        Ok(())
    }

    async fn fail(&self, id: TaskId, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', completed_at = ?, error = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(encode_ts(Utc::now()))
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.conflict(id, TaskStatus::Failed).await);
        }
        Ok(())
    }

    /// A Processing task goes back to Pending. Calling this on a task that is
    /// already Pending only bumps the counter.
    async fn retry(&self, id: TaskId) -> Result<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE tasks
            SET status = 'pending', retry_count = retry_count + 1, started_at = NULL
            WHERE id = ? AND status IN ('pending', 'processing')
            RETURNING retry_count
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((count,)) => to_u32("retry_count", count),
            None => Err(self.conflict(id, TaskStatus::Pending).await),
        }
    }

    async fn release_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', started_at = NULL
            WHERE status = 'processing' AND started_at < ?
            "#,
        )
        .bind(encode_ts(older_than))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        self.fetch_task(&id.to_string()).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1"));
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(platform) = &filter.platform {
            query.push(" AND platform = ").push_bind(platform.as_str());
        }
        if filter.status.is_some() {
            query.push(" ORDER BY priority DESC, created_at ASC, rowid ASC");
        } else {
            query.push(" ORDER BY created_at DESC, rowid DESC");
        }
        query.push(" LIMIT ").push_bind(filter.limit);

        let rows: Vec<TaskRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn count(&self, status: TaskStatus) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.record(status.parse()?, count.max(0) as u64);
        }
        Ok(stats)
    }

    async fn delete(&self, id: TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct TaskRow {
    id: String,
    url: String,
    platform: String,
    status: String,
    priority: i64,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    result_path: Option<String>,
    error: Option<String>,
    retry_count: i64,
    discovered_links_count: i64,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id.parse()?,
            url: self.url,
            platform: self.platform,
            status: self.status.parse()?,
            priority: self.priority,
            created_at: decode_ts("created_at", &self.created_at)?,
            started_at: decode_opt_ts("started_at", self.started_at.as_deref())?,
            completed_at: decode_opt_ts("completed_at", self.completed_at.as_deref())?,
            result_path: self.result_path,
            error: self.error,
            retry_count: to_u32("retry_count", self.retry_count)?,
            discovered_links_count: to_u32("discovered_links_count", self.discovered_links_count)?,
        })
    }
}

/// A zero-row update against a row whose current status allows the move
/// means another writer got there between our update and this read.
fn classify_conflict(id: TaskId, current: Option<TaskStatus>, to: TaskStatus) -> CrawlerError {
    match current {
        None => CrawlerError::TaskNotFound(id),
        Some(status) => match status.transition(id, to) {
            Ok(_) => CrawlerError::ConcurrentUpdate { id, status },
            Err(e) => e,
        },
    }
}

fn to_u32(field: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| CrawlerError::invalid_value(field, value.to_string()))
}
