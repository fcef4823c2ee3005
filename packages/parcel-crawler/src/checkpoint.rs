//! Worker progress snapshots.
//!
//! Checkpoints are for operators. Nothing reads them back to resume work:
//! after a crash, unfinished tasks are still Pending (or are released from
//! Processing) in the task store and simply get claimed again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::storage::encode_ts;
use crate::traits::CheckpointStore;
use crate::types::{Checkpoint, TaskId};

/// Default id for a checkpoint taken at `at`: `20240131_235959_123456`.
pub fn checkpoint_id_for(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S_%6f").to_string()
}

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Persist a snapshot stamped with the current time.
    pub async fn save(
        &self,
        checkpoint_id: Option<String>,
        task_id: Option<TaskId>,
        processed_count: u64,
        error_count: u64,
        metadata: serde_json::Value,
    ) -> Result<Checkpoint> {
        let now = Utc::now();
        let checkpoint = Checkpoint {
            checkpoint_id: checkpoint_id.unwrap_or_else(|| checkpoint_id_for(now)),
            timestamp: encode_ts(now),
            task_id,
            processed_count,
            error_count,
            metadata,
        };

        self.store.insert(&checkpoint).await?;
        debug!(
            checkpoint_id = %checkpoint.checkpoint_id,
            processed = processed_count,
            errors = error_count,
            "checkpoint saved"
        );
        Ok(checkpoint)
    }

    /// Snapshot with the greatest timestamp.
    pub async fn get_latest(&self) -> Result<Option<Checkpoint>> {
        self.store.latest().await
    }

    pub async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        self.store.get(checkpoint_id).await
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        self.store.list().await
    }

    pub async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        self.store.delete(checkpoint_id).await
    }

    /// Keep the `keep_count` most recent snapshots and drop the rest.
    pub async fn cleanup(&self, keep_count: usize) -> Result<u64> {
        let removed = self.store.prune(keep_count).await?;
        if removed > 0 {
            debug!(removed, kept = keep_count, "pruned checkpoints");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn checkpoint_ids_sort_by_time() {
        let a = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        let b = a + chrono::Duration::microseconds(1);

        assert_eq!(checkpoint_id_for(a), "20240131_235959_000000");
        assert!(checkpoint_id_for(a) < checkpoint_id_for(b));
    }
}
