use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::*;

// ============================================================================
// STORAGE: durable queue state
// ============================================================================

/// Durable, priority-ordered task queue.
///
/// The store is the single source of truth for task status. Every status
/// change goes through one of the operations below; each is a conditional
/// update that only applies when the row is still in an allowed source state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Enqueue a task. Duplicate URLs are accepted.
    async fn add(&self, task: NewTask) -> Result<TaskId>;

    /// Claim the best Pending task (highest priority, then oldest).
    ///
    /// Returns `None` when nothing is claimable. Losing a claim race to
    /// another worker is not an error.
    async fn claim_next(&self, platform: Option<&str>) -> Result<Option<Task>>;

    /// Claim one specific task. `false` if it was no longer Pending.
    async fn claim(&self, id: TaskId) -> Result<bool>;

    async fn complete(
        &self,
        id: TaskId,
        result_path: &str,
        discovered_links_count: u32,
    ) -> Result<()>;

    async fn fail(&self, id: TaskId, error: &str) -> Result<()>;

    /// Put a Processing task back to Pending and return the new retry count.
    async fn retry(&self, id: TaskId) -> Result<u32>;

    /// Return Processing tasks claimed before `older_than` to Pending.
    async fn release_stale(&self, older_than: DateTime<Utc>) -> Result<u64>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;
    async fn count(&self, status: TaskStatus) -> Result<u64>;

    async fn queue_depth(&self) -> Result<u64> {
        self.count(TaskStatus::Pending).await
    }

    async fn stats(&self) -> Result<QueueStats>;

    /// Administrative removal. `false` if the task did not exist.
    async fn delete(&self, id: TaskId) -> Result<bool>;
}

/// Audit log of discovered links.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn record(&self, link: &DiscoveredLink) -> Result<()>;
    async fn list_by_source(&self, source_task_id: TaskId) -> Result<Vec<DiscoveredLink>>;
    async fn get_unprocessed(&self, source_task_id: Option<TaskId>)
        -> Result<Vec<DiscoveredLink>>;
    /// Flag every record for `url` as consumed; returns rows touched.
    async fn mark_processed(&self, url: &str) -> Result<u64>;
    async fn count_unprocessed(&self) -> Result<u64>;
}

/// Append-only checkpoint persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn insert(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn get(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>>;
    async fn latest(&self) -> Result<Option<Checkpoint>>;
    /// Newest first
    async fn list(&self) -> Result<Vec<Checkpoint>>;
    async fn delete(&self, checkpoint_id: &str) -> Result<bool>;
    /// Keep the `keep` newest checkpoints; returns how many were removed.
    async fn prune(&self, keep: usize) -> Result<u64>;
}

// ============================================================================
// CAPABILITIES: external collaborators consumed by the worker
// ============================================================================

/// Retrieves page content for a URL.
///
/// Implementations own transient retry, anti-bot handling and timeouts. Any
/// error returned here counts as one task-level failure.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedContent>;

    /// Release browser/session resources. Called once when the worker stops.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Extracts structured data from fetched HTML. Must be side-effect free.
pub trait Parser: Send + Sync {
    fn parse(&self, html: &str) -> anyhow::Result<ParsedResult>;
}

/// Persists parse results and raw page content.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Write the result document for a task, returning its location.
    async fn save_result(
        &self,
        task_id: TaskId,
        platform: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<String>;

    async fn save_text(&self, text: &str, path: &Path) -> anyhow::Result<()>;

    /// Where raw HTML for a task should be written.
    fn raw_html_path(&self, task_id: TaskId, platform: &str) -> PathBuf;
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Output of a `Fetcher`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedContent {
    pub html: String,
    #[serde(default)]
    pub discovered_urls: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl FetchedContent {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }

    /// SHA-256 of the HTML, hex encoded
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.html.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Output of a `Parser`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedResult {
    pub parcel_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Named outbound links (`"gis_map"` -> URL) that are not crawled
    #[serde(default)]
    pub external_links: HashMap<String, String>,
    #[serde(default)]
    pub discovered_links: Vec<DiscoveredLink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_sha256() {
        let content = FetchedContent::new("hello");
        assert_eq!(
            content.content_hash(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content.content_hash(), FetchedContent::new("hello").content_hash());
        assert_ne!(content.content_hash(), FetchedContent::new("hello!").content_hash());
    }
}
