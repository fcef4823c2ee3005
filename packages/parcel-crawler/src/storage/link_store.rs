use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, QueryBuilder, Sqlite};

use super::{encode_ts, Database};
use crate::error::Result;
use crate::traits::LinkStore;
use crate::types::{DiscoveredLink, TaskId};

const LINK_COLUMNS: &str = "source_task_id, url, relationship_type, priority_delta, processed";

/// SQLite-backed discovered link audit log.
pub struct SqliteLinkStore {
    pool: SqlitePool,
}

impl SqliteLinkStore {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }
}

#[async_trait]
impl LinkStore for SqliteLinkStore {
    async fn record(&self, link: &DiscoveredLink) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discovered_links
                (source_task_id, url, relationship_type, priority_delta, added_at, processed)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(link.source_task_id.map(|id| id.to_string()))
        .bind(&link.url)
        .bind(link.relationship_type.as_str())
        .bind(link.priority_delta)
        .bind(encode_ts(Utc::now()))
        .bind(link.processed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_source(&self, source_task_id: TaskId) -> Result<Vec<DiscoveredLink>> {
        let rows = sqlx::query_as::<_, LinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM discovered_links WHERE source_task_id = ? ORDER BY id ASC"
        ))
        .bind(source_task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LinkRow::into_link).collect()
    }

    async fn get_unprocessed(
        &self,
        source_task_id: Option<TaskId>,
    ) -> Result<Vec<DiscoveredLink>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {LINK_COLUMNS} FROM discovered_links WHERE processed = 0"
        ));
        if let Some(source) = source_task_id {
            query.push(" AND source_task_id = ").push_bind(source.to_string());
        }
        query.push(" ORDER BY priority_delta DESC, added_at ASC, id ASC");

        let rows: Vec<LinkRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(LinkRow::into_link).collect()
    }

    async fn mark_processed(&self, url: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE discovered_links SET processed = 1 WHERE url = ? AND processed = 0")
                .bind(url)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn count_unprocessed(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM discovered_links WHERE processed = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }
}

#[derive(Debug, FromRow)]
struct LinkRow {
    source_task_id: Option<String>,
    url: String,
    relationship_type: String,
    priority_delta: i64,
    processed: bool,
}

impl LinkRow {
    fn into_link(self) -> Result<DiscoveredLink> {
        Ok(DiscoveredLink {
            url: self.url,
            relationship_type: self.relationship_type.parse()?,
            priority_delta: self.priority_delta,
            source_task_id: self.source_task_id.map(|id| id.parse()).transpose()?,
            processed: self.processed,
        })
    }
}
