//! Test harness backed by a throwaway SQLite database.
//!
//! Each test gets its own migrated database file and data directory inside a
//! temp dir, so tests never share queue state.

use anyhow::{Context, Result};
use parcel_crawler::{
    CheckpointManager, Database, DiscoveryEngine, FileResultSink, Fetcher, Parser,
    PlatformConfig, PriorityCalculator, SqliteCheckpointStore, SqliteLinkStore, SqliteTaskStore,
    TaskStore, Worker, WorkerConfig,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_context::AsyncTestContext;

/// Test harness that manages per-test infrastructure.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let id = ctx.tasks.add(NewTask::new("https://example.com", "beacon")).await.unwrap();
/// }
/// ```
pub struct TestHarness {
    pub db: Database,
    pub tasks: Arc<SqliteTaskStore>,
    pub links: Arc<SqliteLinkStore>,
    pub checkpoints: Arc<SqliteCheckpointStore>,
    dir: TempDir,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let dir = TempDir::new().context("Failed to create temp dir")?;
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());

        let db = Database::connect(&url)
            .await
            .context("Failed to open test database")?;
        db.migrate().await.context("Failed to run migrations")?;

        Ok(Self {
            tasks: Arc::new(SqliteTaskStore::new(&db)),
            links: Arc::new(SqliteLinkStore::new(&db)),
            checkpoints: Arc::new(SqliteCheckpointStore::new(&db)),
            db,
            dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        self.tasks.clone()
    }

    pub fn discovery(&self, platform: &PlatformConfig) -> DiscoveryEngine {
        self.discovery_over(self.task_store(), platform)
    }

    /// Discovery engine that enqueues through `tasks` instead of the harness store.
    pub fn discovery_over(
        &self,
        tasks: Arc<dyn TaskStore>,
        platform: &PlatformConfig,
    ) -> DiscoveryEngine {
        DiscoveryEngine::new(
            tasks,
            self.links.clone(),
            PriorityCalculator::new(&platform.priority),
            platform.name.clone(),
            platform.discovery.scan_window,
        )
    }

    pub fn checkpoint_manager(&self) -> CheckpointManager {
        CheckpointManager::new(self.checkpoints.clone())
    }

    pub fn sink(&self) -> Arc<FileResultSink> {
        Arc::new(FileResultSink::new(self.data_dir()))
    }

    /// Worker with fast polling, wired to this harness's stores.
    pub fn worker(
        &self,
        platform: PlatformConfig,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        config: WorkerConfig,
    ) -> Worker {
        let discovery = self.discovery(&platform);
        self.worker_with_discovery(platform, discovery, fetcher, parser, config)
    }

    pub fn worker_with_discovery(
        &self,
        platform: PlatformConfig,
        discovery: DiscoveryEngine,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        config: WorkerConfig,
    ) -> Worker {
        Worker::new(
            self.task_store(),
            discovery,
            self.checkpoint_manager(),
            fetcher,
            parser,
            self.sink(),
            Arc::new(platform),
            config.with_poll_interval(Duration::from_millis(20)),
        )
    }
}
