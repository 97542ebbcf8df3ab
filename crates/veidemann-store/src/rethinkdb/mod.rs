//! RethinkDB-backed `DocumentStore`.
//!
//! ```text
//! RethinkStore
//!   ├── query connection (Mutex<Option<Connection>>)  crawl_jobs, latest_execution, ...
//!   ├── changefeed connection ── crawl_log ──► mpsc ──► consumer
//!   └── changefeed connection ── page_log  ──► mpsc ──► consumer
//! ```
//!
//! Request/response queries share one connection and run one at a time.
//! A query that fails at the transport level drops the connection; the
//! next query reconnects. Each changefeed owns a connection for its
//! lifetime.

mod connection;
pub mod reql;
pub mod scram;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::records::{JobDefinition, JobExecutionRecord, SeedExecutionRecord, Table};
use crate::store::{CHANGEFEED_BUFFER, ChangeStream, DocumentStore, REQUIRED_TABLES};
use connection::Connection;

/// Where and how to connect.
#[derive(Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Bound on connecting, the handshake, and every query.
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct RethinkStore {
    opts: ConnectOptions,
    conn: Mutex<Option<Connection>>,
}

impl RethinkStore {
    /// Open and authenticate the query connection.
    pub async fn connect(opts: ConnectOptions) -> StoreResult<Self> {
        let conn = Connection::open(&opts).await?;
        info!(address = %opts.address(), database = %opts.database, "connected to rethinkdb");
        Ok(Self {
            opts,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Like [`connect`](Self::connect), retrying transport failures every
    /// `backoff` until the first success.
    pub async fn connect_with_retry(opts: ConnectOptions, backoff: Duration) -> StoreResult<Self> {
        let mut attempt = 1u32;
        loop {
            match Self::connect(opts.clone()).await {
                Ok(store) => return Ok(store),
                Err(e) if e.is_retryable() => {
                    warn!(
                        address = %opts.address(),
                        attempt,
                        error = %e,
                        retry_in = ?backoff,
                        "rethinkdb not reachable, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run(&self, term: Value) -> StoreResult<Vec<Value>> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            debug!(address = %self.opts.address(), "reopening rethinkdb query connection");
            *guard = Some(Connection::open(&self.opts).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::Connection("no query connection".to_string()));
        };

        let result = match tokio::time::timeout(self.opts.timeout, conn.run(term)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.opts.timeout)),
        };

        // After a transport error or timeout the stream position is unknown.
        if let Err(e) = &result {
            if e.is_retryable() || matches!(e, StoreError::Protocol(_)) {
                *guard = None;
            }
        }
        result
    }
}

#[async_trait]
impl DocumentStore for RethinkStore {
    async fn verify(&self) -> StoreResult<()> {
        let databases = self.run(reql::db_list()).await?;
        if !databases.iter().any(|d| d.as_str() == Some(self.opts.database.as_str())) {
            return Err(StoreError::Schema(format!(
                "database '{}' does not exist",
                self.opts.database
            )));
        }

        let tables = self.run(reql::table_list()).await?;
        let missing: Vec<&str> = REQUIRED_TABLES
            .iter()
            .copied()
            .filter(|required| !tables.iter().any(|t| t.as_str() == Some(*required)))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Schema(format!(
                "missing tables in '{}': {}",
                self.opts.database,
                missing.join(", ")
            )));
        }

        debug!(database = %self.opts.database, "rethinkdb schema verified");
        Ok(())
    }

    async fn subscribe(&self, table: Table) -> StoreResult<ChangeStream> {
        let conn = Connection::open(&self.opts).await?;
        let (tx, rx) = mpsc::channel(CHANGEFEED_BUFFER);
        tokio::spawn(conn.follow_changes(table, tx));
        info!(%table, "subscribed to changefeed");
        Ok(rx)
    }

    async fn crawl_jobs(&self) -> StoreResult<Vec<JobDefinition>> {
        self.run(reql::crawl_jobs())
            .await?
            .into_iter()
            .map(JobDefinition::from_document)
            .collect()
    }

    async fn latest_execution(
        &self,
        job: &JobDefinition,
    ) -> StoreResult<Option<JobExecutionRecord>> {
        self.run(reql::latest_job_execution(&job.id))
            .await?
            .into_iter()
            .next()
            .map(JobExecutionRecord::from_document)
            .transpose()
    }

    async fn seed_executions(
        &self,
        job_execution_id: &str,
    ) -> StoreResult<Vec<SeedExecutionRecord>> {
        self.run(reql::seed_executions(job_execution_id))
            .await?
            .into_iter()
            .map(SeedExecutionRecord::from_document)
            .collect()
    }
}
