//! Job status aggregator — periodically rebuilds per-job state gauges.
//!
//! For every crawl job:
//!
//! ```text
//! latest job execution ──► snapshot (or zeroed default)
//!                               │
//!                     active? ──┤── no ──► publish snapshot
//!                               │
//!                              yes
//!                               ▼
//!           Σ one-hot(seed executions) ──► publish recomputed totals
//! ```
//!
//! Any failed or timed-out query ends the pass with an error, and the
//! background task with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use veidemann_store::{DocumentStore, JobDefinition};

use crate::error::CollectError;
use crate::registry::Registry;
use crate::status::{AggregatedJobStatus, StatusVector};

pub struct JobStatusAggregator {
    store: Arc<dyn DocumentStore>,
    registry: Arc<Registry>,
    /// Bound on one whole pass.
    query_timeout: Duration,
}

impl JobStatusAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<Registry>, query_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            query_timeout,
        }
    }

    /// Compute the current status of every crawl job without publishing.
    pub async fn collect(&self) -> Result<Vec<AggregatedJobStatus>, CollectError> {
        let jobs = self.store.crawl_jobs().await?;
        let mut statuses = Vec::with_capacity(jobs.len());
        for job in &jobs {
            statuses.push(self.aggregate(job).await?);
        }
        Ok(statuses)
    }

    async fn aggregate(&self, job: &JobDefinition) -> Result<AggregatedJobStatus, CollectError> {
        let latest = self.store.latest_execution(job).await?;
        let mut status = AggregatedJobStatus::from_snapshot(&job.name, latest.as_ref());

        if status.is_active() {
            let seeds = self.store.seed_executions(&status.job_execution_id).await?;
            debug!(
                job = %job.name,
                job_execution_id = %status.job_execution_id,
                seeds = seeds.len(),
                "recomputing active job from seed executions"
            );
            status.totals = seeds.iter().map(StatusVector::from_seed).sum();
        }
        Ok(status)
    }

    /// Set the `job.status` and `job.size` gauges for one job.
    pub fn publish(&self, status: &AggregatedJobStatus) {
        let name = status.job_name.as_str();
        for (state, count) in status.totals.states() {
            self.registry
                .job_status
                .with_label_values(&[name, state.as_str()])
                .set(count as f64);
        }
        for (counter, value) in status.totals.sizes() {
            self.registry
                .job_size
                .with_label_values(&[name, counter.as_str()])
                .set(value as f64);
        }
    }

    /// Run one aggregation pass over all jobs. Returns the number of jobs
    /// published.
    pub async fn poll_once(&self) -> Result<usize, CollectError> {
        let statuses = tokio::time::timeout(self.query_timeout, self.collect())
            .await
            .map_err(|_| CollectError::Timeout {
                operation: "job status query",
                timeout: self.query_timeout,
            })??;

        for status in &statuses {
            self.publish(status);
        }
        debug!(jobs = statuses.len(), "job status updated");
        Ok(statuses.len())
    }

    /// Poll now and then every `interval` on a background task. The task
    /// only finishes on the first failed pass.
    pub fn run(self: Arc<Self>, interval: Duration) -> JoinHandle<Result<(), CollectError>> {
        tokio::spawn(async move { self.poll_forever(interval).await })
    }

    async fn poll_forever(&self, interval: Duration) -> Result<(), CollectError> {
        info!(interval = ?interval, "job status aggregator started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "job status aggregation failed");
                return Err(e);
            }
        }
    }
}
