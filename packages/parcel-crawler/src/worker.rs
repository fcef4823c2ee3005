//! Crawl worker: the claim/process loop for one platform.
//!
//! # Architecture
//!
//! ```text
//! Worker
//!     │
//!     ├─► Claim next task (TaskStore::claim_next, CAS)
//!     ├─► Fetch page (Fetcher)
//!     ├─► Parse page (Parser)
//!     ├─► Persist result + raw HTML (ResultSink)
//!     ├─► Queue discovered links (DiscoveryEngine)
//!     ├─► Mark completed, or retry / fail via TaskStore
//!     └─► Checkpoint every N processed tasks (CheckpointManager)
//! ```
//!
//! One task is fully processed before the next is claimed. Scale out by
//! running more workers against the same store; the CAS claim keeps them
//! from processing the same task.
//!
//! # Example
//!
//! ```ignore
//! let mut worker = Worker::new(
//!     tasks, discovery, checkpoints, fetcher, parser, sink,
//!     Arc::new(PlatformConfig::new("beacon")),
//!     WorkerConfig::default().with_drain_mode(true),
//! );
//! let stop = worker.stop_handle();
//! tokio::spawn(async move { tokio::signal::ctrl_c().await.ok(); stop.cancel(); });
//! let summary = worker.run().await?;
//! ```

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::{PlatformConfig, WorkerConfig};
use crate::discovery::DiscoveryEngine;
use crate::error::Result;
use crate::traits::{FetchedContent, Fetcher, ParsedResult, Parser, ResultSink, TaskStore};
use crate::types::{Task, TaskId};

/// Where the worker is in its per-task cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Claiming,
    Processing,
    Persisting,
    Discovering,
    Retrying,
    Failing,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Claiming => "claiming",
            WorkerState::Processing => "processing",
            WorkerState::Persisting => "persisting",
            WorkerState::Discovering => "discovering",
            WorkerState::Retrying => "retrying",
            WorkerState::Failing => "failing",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub processed_count: u64,
    pub retried_count: u64,
    pub error_count: u64,
}

pub struct Worker {
    tasks: Arc<dyn TaskStore>,
    discovery: DiscoveryEngine,
    checkpoints: CheckpointManager,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    sink: Arc<dyn ResultSink>,
    platform: Arc<PlatformConfig>,
    config: WorkerConfig,
    shutdown: CancellationToken,
    state: WorkerState,
    current_task: Option<TaskId>,
    processed_count: u64,
    retried_count: u64,
    error_count: u64,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        discovery: DiscoveryEngine,
        checkpoints: CheckpointManager,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        sink: Arc<dyn ResultSink>,
        platform: Arc<PlatformConfig>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            tasks,
            discovery,
            checkpoints,
            fetcher,
            parser,
            sink,
            platform,
            config,
            shutdown: CancellationToken::new(),
            state: WorkerState::Idle,
            current_task: None,
            processed_count: 0,
            retried_count: 0,
            error_count: 0,
        }
    }

    /// Token that stops the loop when cancelled. The task in flight finishes first.
    pub fn stop_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            worker_id: self.config.worker_id.clone(),
            processed_count: self.processed_count,
            retried_count: self.retried_count,
            error_count: self.error_count,
        }
    }

    /// Run until stopped, or until the queue is empty in drain mode.
    ///
    /// Task failures never end the loop. Only an invalid configuration is
    /// returned as an error.
    pub async fn run(&mut self) -> Result<WorkerSummary> {
        self.config.validate()?;

        info!(
            worker_id = %self.config.worker_id,
            platform = %self.platform.name,
            drain_mode = self.config.drain_mode,
            "crawl worker starting"
        );

        if let Some(after) = self.config.stale_claim_after {
            self.release_stale(after).await;
        }

        loop {
            if self.shutdown.is_cancelled() {
                info!(worker_id = %self.config.worker_id, "stop requested");
                break;
            }

            if self.config.drain_mode {
                match self.tasks.queue_depth().await {
                    Ok(0) => {
                        info!(worker_id = %self.config.worker_id, "queue drained, stopping");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "failed to read queue depth");
                        if self.idle_wait().await {
                            break;
                        }
                        continue;
                    }
                }
            }

            self.state = WorkerState::Claiming;
            let platform = Some(self.platform.name.as_str());
            let claimed = match self.tasks.claim_next(platform).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(error = %e, "failed to claim task");
                    self.state = WorkerState::Idle;
                    if self.idle_wait().await {
                        break;
                    }
                    continue;
                }
            };

            let Some(task) = claimed else {
                self.state = WorkerState::Idle;
                if self.config.drain_mode {
                    info!(worker_id = %self.config.worker_id, "no claimable task, stopping");
                    break;
                }
                if self.idle_wait().await {
                    break;
                }
                continue;
            };

            let completed = self.process(task).await;
            self.state = WorkerState::Idle;

            if completed && self.processed_count % self.config.checkpoint_interval == 0 {
                self.checkpoint().await;
            }
        }

        self.cleanup().await;
        Ok(self.summary())
    }

    /// Sleep for the poll interval. Returns `true` if stopped while waiting.
    async fn idle_wait(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    async fn release_stale(&self, after: std::time::Duration) {
        let Ok(after) = ChronoDuration::from_std(after) else {
            warn!("stale claim window out of range, skipping release");
            return;
        };

        match self.tasks.release_stale(Utc::now() - after).await {
            Ok(0) => {}
            Ok(released) => info!(released, "released stale claims"),
            Err(e) => warn!(error = %e, "failed to release stale claims"),
        }
    }

    /// Process one claimed task. Returns `true` if it completed.
    async fn process(&mut self, task: Task) -> bool {
        self.current_task = Some(task.id);
        info!(task_id = %task.id, url = %task.url, "processing task");

        match self.execute(&task).await {
            Ok(links_added) => {
                self.processed_count += 1;
                info!(task_id = %task.id, links_added, "task completed");
                true
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %format!("{e:#}"), "task failed");
                self.handle_failure(&task, &e).await;
                false
            }
        }
    }

    async fn execute(&mut self, task: &Task) -> anyhow::Result<u32> {
        self.state = WorkerState::Processing;

        let content = self
            .fetcher
            .fetch(&task.url)
            .await
            .with_context(|| format!("fetch {}", task.url))?;
        debug!(task_id = %task.id, bytes = content.html.len(), "fetched page");

        let parsed = self.parser.parse(&content.html).context("parse")?;

        self.state = WorkerState::Persisting;
        let envelope = result_envelope(task, &content, &parsed);
        let result_path = self
            .sink
            .save_result(task.id, &task.platform, &envelope)
            .await
            .context("save result")?;
        let raw_path = self.sink.raw_html_path(task.id, &task.platform);
        self.sink
            .save_text(&content.html, &raw_path)
            .await
            .context("save raw html")?;

        let mut links_added = 0;
        if self.platform.discovery.enabled && !parsed.discovered_links.is_empty() {
            self.state = WorkerState::Discovering;
            let added = self
                .discovery
                .process(task.id, &parsed.discovered_links)
                .await
                .context("discovery")?;
            links_added = u32::try_from(added).unwrap_or(u32::MAX);
        }

        self.tasks
            .complete(task.id, &result_path, links_added)
            .await
            .context("complete")?;

        Ok(links_added)
    }

    /// Retry the task, or fail it for good once retries are used up.
    async fn handle_failure(&mut self, task: &Task, failure: &anyhow::Error) {
        self.state = WorkerState::Retrying;

        let attempts = match self.tasks.retry(task.id).await {
            Ok(attempts) => attempts,
            Err(e) if e.is_state_conflict() => {
                warn!(task_id = %task.id, error = %e, "task changed state during processing");
                return;
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "failed to requeue task");
                return;
            }
        };

        if attempts <= self.config.max_retries {
            self.retried_count += 1;
            info!(task_id = %task.id, attempt = attempts, "task will be retried");
            return;
        }

        self.state = WorkerState::Failing;
        let message = format!("{failure:#}");
        match self.tasks.fail(task.id, &message).await {
            Ok(()) => {
                self.error_count += 1;
                error!(
                    task_id = %task.id,
                    attempts,
                    error = %message,
                    "task failed permanently"
                );
            }
            Err(e) => error!(task_id = %task.id, error = %e, "failed to mark task as failed"),
        }
    }

    async fn checkpoint(&self) {
        let metadata = json!({
            "platform": self.platform.name,
            "drain_mode": self.config.drain_mode,
            "worker_id": self.config.worker_id,
        });

        let saved = self
            .checkpoints
            .save(
                None,
                self.current_task,
                self.processed_count,
                self.error_count,
                metadata,
            )
            .await;

        if let Err(e) = saved {
            warn!(error = %e, "checkpoint write failed");
            return;
        }

        if let Err(e) = self.checkpoints.cleanup(self.config.checkpoint_keep).await {
            warn!(error = %e, "checkpoint cleanup failed");
        }
    }

    async fn cleanup(&mut self) {
        self.checkpoint().await;

        if let Err(e) = self.fetcher.close().await {
            warn!(error = %e, "failed to close fetcher");
        }

        self.state = WorkerState::Stopped;
        info!(
            worker_id = %self.config.worker_id,
            processed = self.processed_count,
            retried = self.retried_count,
            errors = self.error_count,
            "crawl worker stopped"
        );
    }
}

/// Document written by the sink for a completed task.
fn result_envelope(
    task: &Task,
    content: &FetchedContent,
    parsed: &ParsedResult,
) -> serde_json::Value {
    json!({
        "task_id": task.id,
        "url": task.url,
        "platform": task.platform,
        "parcel_id": parsed.parcel_id,
        "data": parsed.data,
        "image_urls": parsed.image_urls,
        "external_links": parsed.external_links,
        "discovered_links": parsed.discovered_links,
        "discovered_urls": content.discovered_urls,
        "fetch_metadata": content.metadata,
        "content_hash": content.content_hash(),
        "scraped_at": Utc::now(),
    })
}
