//! Change stream consumer — turns `crawl_log` and `page_log` changes into
//! metric updates.
//!
//! ```text
//! DocumentStore::subscribe(crawl_log) ─► observe ─► handle_crawl_log ─► uri.*
//! DocumentStore::subscribe(page_log)  ─► observe ─► handle_page_log  ─► page.*
//! ```
//!
//! Each table is consumed by its own task, strictly in feed order. A feed
//! that ends (sentinel or closed channel) is fatal: `observe` never returns
//! `Ok`.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use veidemann_store::{ChangeStream, CrawlLogRecord, DocumentStore, PageLogRecord, Table};

use crate::error::CollectError;
use crate::registry::Registry;

pub struct ChangeStreamConsumer {
    registry: Arc<Registry>,
}

impl ChangeStreamConsumer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn handle_crawl_log(&self, record: &CrawlLogRecord) {
        let r = &self.registry;

        r.uri_requests.inc();
        if record.error.is_some() {
            r.uri_requests_failed.inc();
        }
        let code = record.status_code.to_string();
        r.uri_statuscode.with_label_values(&[code.as_str()]).inc();
        r.uri_record_type
            .with_label_values(&[record.record_type.as_str()])
            .inc();
        if let Some(content_type) = &record.content_type {
            r.uri_mime
                .with_label_values(&[base_mime_type(content_type)])
                .inc();
        }
        if let Some(ms) = record.fetch_time_ms {
            r.uri_fetch_time.observe(ms / 1000.0);
        }
        if let Some(size) = record.size_bytes {
            r.uri_size.observe(size);
        }
    }

    pub fn handle_page_log(&self, record: &PageLogRecord) {
        let r = &self.registry;

        r.page_requests.inc();
        if let Some(outlinks) = &record.outlinks {
            let n = outlinks.len() as f64;
            r.page_outlinks.observe(n);
            r.page_links.with_label_values(&["outlinks"]).inc_by(n);
        }
        if let Some(resources) = &record.resources {
            let cached = resources.iter().filter(|res| res.from_cache).count() as f64;
            let not_cached = resources.len() as f64 - cached;
            r.page_resources.observe(cached + not_cached);
            r.page_resources_cache_hit.observe(cached);
            r.page_resources_cache_miss.observe(not_cached);
            r.page_links
                .with_label_values(&["resources_notcached"])
                .inc_by(not_cached);
            r.page_links
                .with_label_values(&["resources_cached"])
                .inc_by(cached);
        }
    }

    /// Decode one document from `table` and apply it.
    pub fn handle(&self, table: Table, doc: Value) -> Result<(), CollectError> {
        match table {
            Table::CrawlLog => self.handle_crawl_log(&CrawlLogRecord::from_document(doc)?),
            Table::PageLog => self.handle_page_log(&PageLogRecord::from_document(doc)?),
        }
        Ok(())
    }

    /// Apply every change on `stream` until it ends.
    ///
    /// Returns `StreamClosed` when the feed terminates, or the decode error
    /// of the first malformed document.
    pub async fn observe_stream(
        &self,
        table: Table,
        mut stream: ChangeStream,
    ) -> Result<(), CollectError> {
        info!(%table, "consuming changefeed");
        let mut handled = 0u64;

        while let Some(event) = stream.recv().await {
            let Some(doc) = event.new_value else {
                debug!(%table, "changefeed sent termination sentinel");
                break;
            };
            if let Err(e) = self.handle(table, doc) {
                error!(%table, error = %e, "malformed changefeed document");
                return Err(e);
            }
            handled += 1;
            trace!(%table, handled, "change applied");
        }

        error!(%table, handled, "changefeed terminated");
        Err(CollectError::StreamClosed { table })
    }

    /// Subscribe to `table` on `store` and consume it.
    pub async fn observe(&self, store: &dyn DocumentStore, table: Table) -> Result<(), CollectError> {
        let stream = store.subscribe(table).await?;
        self.observe_stream(table, stream).await
    }

    /// Consume `table` on a background task.
    pub fn spawn(
        self: Arc<Self>,
        store: Arc<dyn DocumentStore>,
        table: Table,
    ) -> JoinHandle<Result<(), CollectError>> {
        tokio::spawn(async move { self.observe(store.as_ref(), table).await })
    }
}

/// `text/html; charset=utf-8` → `text/html`.
pub fn base_mime_type(content_type: &str) -> &str {
    match content_type.find(';') {
        Some(i) if i > 0 => &content_type[..i],
        _ => content_type,
    }
}
