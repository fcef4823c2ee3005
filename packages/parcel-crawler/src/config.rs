use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CrawlerError;
use crate::types::RelationshipType;

// ============================================================================
// PROCESS CONFIG (environment)
// ============================================================================

/// Process-level configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub platform: String,
    pub worker: WorkerConfig,
    pub discovery_scan_window: i64,
}

impl CrawlerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = WorkerConfig::default();

        let worker = WorkerConfig {
            max_retries: parse_or(&lookup, "MAX_RETRIES", defaults.max_retries)?,
            checkpoint_interval: parse_or(
                &lookup,
                "CHECKPOINT_INTERVAL",
                defaults.checkpoint_interval,
            )?,
            checkpoint_keep: parse_or(&lookup, "CHECKPOINT_KEEP", defaults.checkpoint_keep)?,
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            drain_mode: parse_bool_or(&lookup, "DRAIN_MODE", defaults.drain_mode)?,
            stale_claim_after: lookup("STALE_CLAIM_SECS")
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .context("STALE_CLAIM_SECS must be a valid number")
                })
                .transpose()?,
            ..defaults
        };
        worker.validate()?;

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/crawler.db".to_string()),
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            platform: lookup("PLATFORM").context("PLATFORM must be set")?,
            worker,
            discovery_scan_window: parse_or(
                &lookup,
                "DISCOVERY_SCAN_WINDOW",
                DiscoveryRules::default().scan_window,
            )?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{key} must be a boolean, got {other:?}"),
    }
}

// ============================================================================
// WORKER CONFIG
// ============================================================================

/// Loop knobs for a single worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier recorded in logs and checkpoint metadata
    pub worker_id: String,
    /// Retries allowed before a task is failed permanently
    pub max_retries: u32,
    /// Write a checkpoint every N processed tasks
    pub checkpoint_interval: u64,
    /// Checkpoints retained after pruning
    pub checkpoint_keep: usize,
    /// Idle sleep when no task is claimable
    pub poll_interval: Duration,
    /// Stop once the queue is empty instead of polling
    pub drain_mode: bool,
    /// Release Processing tasks older than this at startup
    pub stale_claim_after: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::now_v7()),
            max_retries: 3,
            checkpoint_interval: 10,
            checkpoint_keep: 5,
            poll_interval: Duration::from_secs(5),
            drain_mode: false,
            stale_claim_after: None,
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_checkpoint_keep(mut self, keep: usize) -> Self {
        self.checkpoint_keep = keep;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_drain_mode(mut self, drain_mode: bool) -> Self {
        self.drain_mode = drain_mode;
        self
    }

    pub fn with_stale_claim_after(mut self, after: Duration) -> Self {
        self.stale_claim_after = Some(after);
        self
    }

    pub fn validate(&self) -> std::result::Result<(), CrawlerError> {
        if self.checkpoint_interval == 0 {
            return Err(CrawlerError::Config(
                "checkpoint_interval must be greater than zero".to_string(),
            ));
        }
        if self.checkpoint_keep == 0 {
            return Err(CrawlerError::Config(
                "checkpoint_keep must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// PLATFORM CONFIG (read-only, injected)
// ============================================================================

/// Read-only per-platform settings shared with the worker.
///
/// Selectors and field mappings belong to the `Parser`; the core only reads
/// the platform name, priority weights and discovery rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub discovery: DiscoveryRules,
    /// Opaque parser settings (selectors, mapping, validation)
    #[serde(default)]
    pub parser: serde_json::Value,
}

impl PlatformConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: PriorityConfig::default(),
            discovery: DiscoveryRules::default(),
            parser: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: PriorityConfig) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryRules) -> Self {
        self.discovery = discovery;
        self
    }
}

/// Base priority and relationship weights
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(default)]
    pub base_priority: i64,
    /// Overrides keyed by relationship name, matched case-insensitively
    #[serde(default)]
    pub relationship_deltas: HashMap<String, i64>,
}

impl PriorityConfig {
    pub fn with_base_priority(mut self, base: i64) -> Self {
        self.base_priority = base;
        self
    }

    pub fn with_delta(mut self, relationship: RelationshipType, delta: i64) -> Self {
        self.relationship_deltas
            .insert(relationship.as_str().to_string(), delta);
        self
    }
}

/// Discovery (ripple) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRules {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pending tasks scanned for duplicate URLs
    #[serde(default = "default_scan_window")]
    pub scan_window: i64,
}

impl Default for DiscoveryRules {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_window: default_scan_window(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scan_window() -> i64 {
    1000
}
