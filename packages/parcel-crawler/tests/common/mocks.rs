//! Scripted `Fetcher` and `Parser` capabilities, plus store wrappers that
//! inject failures.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parcel_crawler::{
    CrawlerError, DiscoveredLink, FetchedContent, Fetcher, NewTask, ParsedResult, Parser,
    QueueStats, Task, TaskFilter, TaskId, TaskStatus, TaskStore,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Serves a fixed HTML page per URL, with optional scripted failures.
#[derive(Default)]
pub struct MockFetcher {
    /// Remaining failures per URL before it starts succeeding
    flaky: Mutex<HashMap<String, usize>>,
    broken: HashSet<String>,
    fetched: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(self, url: impl Into<String>, times: usize) -> Self {
        self.flaky
            .lock()
            .expect("fetcher lock poisoned")
            .insert(url.into(), times);
        self
    }

    pub fn always_failing(mut self, url: impl Into<String>) -> Self {
        self.broken.insert(url.into());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("fetcher lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent> {
        self.fetched
            .lock()
            .expect("fetcher lock poisoned")
            .push(url.to_string());

        if self.broken.contains(url) {
            bail!("connection reset by peer");
        }

        {
            let mut flaky = self.flaky.lock().expect("fetcher lock poisoned");
            if let Some(remaining) = flaky.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    bail!("timed out waiting for page");
                }
            }
        }

        Ok(FetchedContent::new(page_html(url)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn page_html(url: &str) -> String {
    format!("<html><body data-url=\"{url}\">parcel record</body></html>")
}

/// Reads the URL back out of `page_html` and returns scripted links for it.
#[derive(Default)]
pub struct MockParser {
    links: HashMap<String, Vec<DiscoveredLink>>,
}

impl MockParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(mut self, url: impl Into<String>, links: Vec<DiscoveredLink>) -> Self {
        self.links.insert(url.into(), links);
        self
    }
}

impl Parser for MockParser {
    fn parse(&self, html: &str) -> Result<ParsedResult> {
        let url = html
            .split("data-url=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .ok_or_else(|| anyhow!("no parcel record on page"))?;

        let parcel_id = url.rsplit('/').next().map(str::to_string);

        Ok(ParsedResult {
            parcel_id,
            data: json!({ "source_url": url }),
            discovered_links: self.links.get(url).cloned().unwrap_or_default(),
            ..Default::default()
        })
    }
}

/// Delegates to a real store but refuses to `add` URLs containing a marker.
pub struct RejectingTaskStore {
    inner: Arc<dyn TaskStore>,
    marker: String,
    rejected: AtomicUsize,
}

impl RejectingTaskStore {
    pub fn new(inner: Arc<dyn TaskStore>, marker: impl Into<String>) -> Self {
        Self {
            inner,
            marker: marker.into(),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for RejectingTaskStore {
    async fn add(&self, task: NewTask) -> parcel_crawler::Result<TaskId> {
        if task.url.contains(&self.marker) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(CrawlerError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.add(task).await
    }

    async fn claim_next(&self, platform: Option<&str>) -> parcel_crawler::Result<Option<Task>> {
        self.inner.claim_next(platform).await
    }

    async fn claim(&self, id: TaskId) -> parcel_crawler::Result<bool> {
        self.inner.claim(id).await
    }

    async fn complete(
        &self,
        id: TaskId,
        result_path: &str,
        discovered_links_count: u32,
    ) -> parcel_crawler::Result<()> {
        self.inner
            .complete(id, result_path, discovered_links_count)
            .await
    }

    async fn fail(&self, id: TaskId, error: &str) -> parcel_crawler::Result<()> {
        self.inner.fail(id, error).await
    }

    async fn retry(&self, id: TaskId) -> parcel_crawler::Result<u32> {
        self.inner.retry(id).await
    }

    async fn release_stale(&self, older_than: DateTime<Utc>) -> parcel_crawler::Result<u64> {
        self.inner.release_stale(older_than).await
    }

    async fn get(&self, id: TaskId) -> parcel_crawler::Result<Option<Task>> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &TaskFilter) -> parcel_crawler::Result<Vec<Task>> {
        self.inner.list(filter).await
    }

    async fn count(&self, status: TaskStatus) -> parcel_crawler::Result<u64> {
        self.inner.count(status).await
    }

    async fn stats(&self) -> parcel_crawler::Result<QueueStats> {
        self.inner.stats().await
    }

    async fn delete(&self, id: TaskId) -> parcel_crawler::Result<bool> {
        self.inner.delete(id).await
    }
}
