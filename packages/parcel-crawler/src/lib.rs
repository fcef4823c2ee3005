//! Durable crawl queue for parcel and property record sites.
//!
//! Tasks live in a SQLite-backed [`TaskStore`]; [`Worker`]s claim them with a
//! compare-and-swap, fetch and parse the page through injected capabilities,
//! and feed discovered links back into the queue through the
//! [`DiscoveryEngine`].

pub mod checkpoint;
pub mod config;
pub mod discovery;
pub mod error;
pub mod priority;
pub mod sink;
pub mod storage;
pub mod traits;
pub mod types;
pub mod worker;

pub use checkpoint::CheckpointManager;
pub use config::{CrawlerConfig, DiscoveryRules, PlatformConfig, PriorityConfig, WorkerConfig};
pub use discovery::DiscoveryEngine;
pub use error::{CrawlerError, Result};
pub use priority::PriorityCalculator;
pub use sink::FileResultSink;
pub use storage::{Database, SqliteCheckpointStore, SqliteLinkStore, SqliteTaskStore};
pub use traits::{
    CheckpointStore, FetchedContent, Fetcher, LinkStore, ParsedResult, Parser, ResultSink,
    TaskStore,
};
pub use types::*;
pub use worker::{Worker, WorkerState, WorkerSummary};
