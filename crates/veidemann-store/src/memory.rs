//! In-process `DocumentStore` used as a test double.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{StoreError, StoreResult};
use crate::records::{ChangeEvent, JobDefinition, JobExecutionRecord, SeedExecutionRecord, Table};
use crate::store::{CHANGEFEED_BUFFER, ChangeStream, DocumentStore};

#[derive(Default)]
struct Inner {
    jobs: Vec<JobDefinition>,
    executions: Vec<JobExecutionRecord>,
    seeds: Vec<SeedExecutionRecord>,
    feeds: HashMap<Table, Vec<mpsc::Sender<ChangeEvent>>>,
    query_failure: Option<String>,
    missing_table: Option<String>,
}

/// Thread-safe in-memory store. Cloning shares the underlying data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_job(&self, id: &str, name: &str) {
        self.lock().jobs.push(JobDefinition {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn add_execution(&self, record: JobExecutionRecord) {
        self.lock().executions.push(record);
    }

    pub fn add_seed(&self, record: SeedExecutionRecord) {
        self.lock().seeds.push(record);
    }

    /// Make every subsequent query fail with a runtime error.
    pub fn fail_queries(&self, message: &str) {
        self.lock().query_failure = Some(message.to_string());
    }

    /// Make `verify()` report `table` as missing.
    pub fn drop_table(&self, table: &str) {
        self.lock().missing_table = Some(table.to_string());
    }

    /// Deliver a document to every current subscriber of `table`.
    pub async fn publish(&self, table: Table, doc: Value) {
        let senders = self.lock().feeds.get(&table).cloned().unwrap_or_default();
        for tx in senders {
            let _ = tx.send(ChangeEvent::document(table, doc.clone())).await;
        }
    }

    /// End the feed for `table` with the termination sentinel.
    pub async fn terminate(&self, table: Table) {
        let senders = self.lock().feeds.remove(&table).unwrap_or_default();
        for tx in senders {
            let _ = tx.send(ChangeEvent::terminated(table)).await;
        }
    }

    /// Number of live subscriptions on `table`.
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.lock().feeds.get(&table).map_or(0, Vec::len)
    }

    /// Drop the feed for `table` without sending the sentinel.
    pub fn disconnect(&self, table: Table) {
        self.lock().feeds.remove(&table);
    }

    fn check_queries(&self) -> StoreResult<()> {
        match &self.lock().query_failure {
            Some(message) => Err(StoreError::Query {
                kind: "runtime",
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn verify(&self) -> StoreResult<()> {
        match &self.lock().missing_table {
            Some(table) => Err(StoreError::Schema(format!("table '{table}' does not exist"))),
            None => Ok(()),
        }
    }

    async fn subscribe(&self, table: Table) -> StoreResult<ChangeStream> {
        let (tx, rx) = mpsc::channel(CHANGEFEED_BUFFER);
        self.lock().feeds.entry(table).or_default().push(tx);
        Ok(rx)
    }

    async fn crawl_jobs(&self) -> StoreResult<Vec<JobDefinition>> {
        self.check_queries()?;
        Ok(self.lock().jobs.clone())
    }

    async fn latest_execution(
        &self,
        job: &JobDefinition,
    ) -> StoreResult<Option<JobExecutionRecord>> {
        self.check_queries()?;
        let inner = self.lock();
        let latest = inner
            .executions
            .iter()
            .filter(|e| e.job_id == job.id)
            .max_by(|a, b| {
                let a = a.start_time.unwrap_or(f64::MIN);
                let b = b.start_time.unwrap_or(f64::MIN);
                a.total_cmp(&b)
            })
            .cloned();
        Ok(latest)
    }

    async fn seed_executions(
        &self,
        job_execution_id: &str,
    ) -> StoreResult<Vec<SeedExecutionRecord>> {
        self.check_queries()?;
        Ok(self
            .lock()
            .seeds
            .iter()
            .filter(|s| s.job_execution_id == job_execution_id)
            .cloned()
            .collect())
    }
}
