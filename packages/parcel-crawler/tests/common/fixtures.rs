//! Test fixtures for seeding the queue.

use parcel_crawler::{NewTask, TaskId, TaskStore};

pub const PLATFORM: &str = "beacon";

pub fn parcel_url(n: usize) -> String {
    format!("https://beacon.example.com/parcel/{n}")
}

/// Seed `count` Pending tasks with increasing URLs and the given priority.
pub async fn seed_tasks(
    store: &dyn TaskStore,
    platform: &str,
    count: usize,
    priority: i64,
) -> Vec<TaskId> {
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let id = store
            .add(NewTask::new(parcel_url(n), platform).with_priority(priority))
            .await
            .expect("Failed to seed task");
        ids.push(id);
    }
    ids
}
