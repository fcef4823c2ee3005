//! Ripple discovery: turns links found on a parsed page into queued tasks.
//!
//! Duplicate detection is best-effort. Only the current Pending window is
//! scanned, so a URL that already completed or failed is queued again, and
//! two workers discovering the same URL at once can both enqueue it.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::priority::PriorityCalculator;
use crate::traits::{LinkStore, TaskStore};
use crate::types::{DiscoveredLink, NewTask, TaskFilter, TaskId, TaskStatus};

pub struct DiscoveryEngine {
    tasks: Arc<dyn TaskStore>,
    links: Arc<dyn LinkStore>,
    calculator: PriorityCalculator,
    platform: String,
    scan_window: i64,
}

impl DiscoveryEngine {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        links: Arc<dyn LinkStore>,
        calculator: PriorityCalculator,
        platform: impl Into<String>,
        scan_window: i64,
    ) -> Self {
        Self {
            tasks,
            links,
            calculator,
            platform: platform.into(),
            scan_window,
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Enqueue the non-duplicate links discovered by `source_task_id`.
    ///
    /// Returns how many links became tasks. A link that fails to enqueue is
    /// logged and skipped; only failing to read the Pending window is an
    /// error.
    pub async fn process(
        &self,
        source_task_id: TaskId,
        links: &[DiscoveredLink],
    ) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }

        let mut pending_urls = self.pending_window().await?;
        let mut added = 0;

        for link in links {
            if pending_urls.contains(&link.url) {
                debug!(
                    url = %link.url,
                    source_task_id = %source_task_id,
                    "skipping duplicate link"
                );
                continue;
            }

            match self.enqueue(source_task_id, link).await {
                Ok((task_id, priority)) => {
                    pending_urls.insert(link.url.clone());
                    added += 1;
                    debug!(
                        task_id = %task_id,
                        url = %link.url,
                        relationship = %link.relationship_type,
                        priority,
                        "discovered link queued"
                    );
                }
                Err(e) => {
                    warn!(
                        url = %link.url,
                        source_task_id = %source_task_id,
                        error = %e,
                        "failed to queue discovered link"
                    );
                }
            }
        }

        Ok(added)
    }

    async fn pending_window(&self) -> Result<HashSet<String>> {
        let filter = TaskFilter::status(TaskStatus::Pending).with_limit(self.scan_window);
        let pending = self.tasks.list(&filter).await?;
        Ok(pending.into_iter().map(|task| task.url).collect())
    }

    /// Queue one link, then record its audit entry.
    ///
    /// Priority is `base + relationship delta`; the link's own
    /// `priority_delta` is kept on the audit record only. A link whose task
    /// could not be added leaves no audit row. An audit write that fails
    /// after the task is queued is logged and the link still counts.
    async fn enqueue(
        &self,
        source_task_id: TaskId,
        link: &DiscoveredLink,
    ) -> Result<(TaskId, i64)> {
        let priority = self
            .calculator
            .calculate(Some(link.relationship_type), None, 0, 0);

        let task_id = self
            .tasks
            .add(NewTask::new(&link.url, &self.platform).with_priority(priority))
            .await?;

        let audit = DiscoveredLink {
            source_task_id: Some(source_task_id),
            processed: false,
            ..link.clone()
        };
        if let Err(e) = self.links.record(&audit).await {
            warn!(
                task_id = %task_id,
                url = %link.url,
                error = %e,
                "failed to record discovered link"
            );
        }

        Ok((task_id, priority))
    }

    /// Links not yet consumed, optionally limited to one source task.
    pub async fn get_unprocessed(
        &self,
        source_task_id: Option<TaskId>,
    ) -> Result<Vec<DiscoveredLink>> {
        self.links.get_unprocessed(source_task_id).await
    }

    pub async fn mark_processed(&self, url: &str) -> Result<u64> {
        self.links.mark_processed(url).await
    }
}
