use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CrawlerError;

// ============================================================================
// IDS
// ============================================================================

/// Unique identifier for a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CrawlerError::invalid_value("task_id", s))
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// ============================================================================
// ENUMS (type-safe states)
// ============================================================================

/// Lifecycle state of a task.
///
/// Legal transitions:
/// - Pending -> Processing (claim)
/// - Processing -> Completed
/// - Processing -> Pending (retry, stale release)
/// - Pending | Processing -> Failed (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Processing, Completed) => true,
            (Processing, Pending) => true,
            (Pending, Failed) | (Processing, Failed) => true,
            (Pending, Pending)
            | (Pending, Completed)
            | (Processing, Processing)
            | (Completed, _)
            | (Failed, _) => false,
        }
    }

    /// Validate a transition, returning the target state on success.
    pub fn transition(self, id: TaskId, next: TaskStatus) -> Result<TaskStatus, CrawlerError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CrawlerError::InvalidTransition {
                id,
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CrawlerError::invalid_value("status", other)),
        }
    }
}

/// Semantic relation of a discovered link to the record it was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Owner,
    County,
    Parcel,
    Neighbor,
    Related,
    #[default]
    Unknown,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 6] = [
        RelationshipType::Owner,
        RelationshipType::County,
        RelationshipType::Parcel,
        RelationshipType::Neighbor,
        RelationshipType::Related,
        RelationshipType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Owner => "owner",
            RelationshipType::County => "county",
            RelationshipType::Parcel => "parcel",
            RelationshipType::Neighbor => "neighbor",
            RelationshipType::Related => "related",
            RelationshipType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(RelationshipType::Owner),
            "county" => Ok(RelationshipType::County),
            "parcel" => Ok(RelationshipType::Parcel),
            "neighbor" => Ok(RelationshipType::Neighbor),
            "related" => Ok(RelationshipType::Related),
            "unknown" => Ok(RelationshipType::Unknown),
            _ => Err(CrawlerError::invalid_value("relationship_type", s)),
        }
    }
}

// ============================================================================
// CORE TYPES
// ============================================================================

/// A unit of crawl work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub platform: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_path: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub discovered_links_count: u32,
}

/// Input for `TaskStore::add`
#[derive(Debug, Clone)]
pub struct NewTask {
    pub url: String,
    pub platform: String,
    pub priority: i64,
    pub id: Option<TaskId>,
}

impl NewTask {
    pub fn new(url: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            platform: platform.into(),
            priority: 0,
            id: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Filter for `TaskStore::list`
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub platform: Option<String>,
    pub limit: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            platform: None,
            limit: 100,
        }
    }
}

impl TaskFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Outbound link found while processing a task (audit + queue seed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredLink {
    pub url: String,
    #[serde(default)]
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub priority_delta: i64,
    #[serde(default)]
    pub source_task_id: Option<TaskId>,
    #[serde(default)]
    pub processed: bool,
}

impl DiscoveredLink {
    pub fn new(url: impl Into<String>, relationship_type: RelationshipType) -> Self {
        Self {
            url: url.into(),
            relationship_type,
            priority_delta: 0,
            source_task_id: None,
            processed: false,
        }
    }

    pub fn with_priority_delta(mut self, delta: i64) -> Self {
        self.priority_delta = delta;
        self
    }
}

/// Diagnostic snapshot of worker progress. Never drives recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    /// ISO-8601, lexicographically sortable
    pub timestamp: String,
    pub task_id: Option<TaskId>,
    pub processed_count: u64,
    pub error_count: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Task counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }

    pub fn record(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending = count,
            TaskStatus::Processing => self.processing = count,
            TaskStatus::Completed => self.completed = count,
            TaskStatus::Failed => self.failed = count,
        }
    }
}
