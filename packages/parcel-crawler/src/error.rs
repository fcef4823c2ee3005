//! Typed errors for queue storage and orchestration.
//!
//! Store operations return [`CrawlerError`] so callers can tell a missing task
//! or an illegal state transition apart from an I/O failure. The external
//! capabilities (`Fetcher`, `Parser`, `ResultSink`) use `anyhow` instead; the
//! worker only needs their message for the retry/fail decision.

use crate::types::{TaskId, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {id} moved to {status} concurrently")]
    ConcurrentUpdate { id: TaskId, status: TaskStatus },

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl CrawlerError {
    pub fn invalid_value(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.into(),
        }
    }

    /// True when the error only means the task moved on without us.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            CrawlerError::InvalidTransition { .. }
                | CrawlerError::ConcurrentUpdate { .. }
                | CrawlerError::TaskNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CrawlerError>;
