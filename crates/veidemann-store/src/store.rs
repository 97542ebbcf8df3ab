//! The `DocumentStore` trait: everything the collectors need from the
//! crawl-state store.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreResult;
use crate::records::{ChangeEvent, JobDefinition, JobExecutionRecord, SeedExecutionRecord, Table};

/// Tables that must exist before any collector starts.
pub const REQUIRED_TABLES: &[&str] = &[
    "config",
    "job_executions",
    "executions",
    "crawl_log",
    "page_log",
];

/// Capacity of the channel between a changefeed reader and its consumer.
///
/// When full, the reader stops asking the server for more changes, so
/// backlog accumulates in the server's feed buffer rather than here.
pub const CHANGEFEED_BUFFER: usize = 256;

/// Ordered stream of changes for a single table.
pub type ChangeStream = mpsc::Receiver<ChangeEvent>;

/// Read-only access to crawl state.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check that the database and all [`REQUIRED_TABLES`] exist.
    async fn verify(&self) -> StoreResult<()>;

    /// Subscribe to inserts and updates on `table`.
    ///
    /// The stream yields [`ChangeEvent::terminated`] (or simply closes)
    /// when the underlying feed ends.
    async fn subscribe(&self, table: Table) -> StoreResult<ChangeStream>;

    /// All job definitions of kind `crawlJob`.
    async fn crawl_jobs(&self) -> StoreResult<Vec<JobDefinition>>;

    /// The most recently started execution of `job`, if it ever ran.
    async fn latest_execution(&self, job: &JobDefinition)
        -> StoreResult<Option<JobExecutionRecord>>;

    /// Seed executions belonging to one job execution.
    async fn seed_executions(&self, job_execution_id: &str)
        -> StoreResult<Vec<SeedExecutionRecord>>;
}
