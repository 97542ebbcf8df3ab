//! The process-wide metrics registry.
//!
//! Built once in `main` and shared by `Arc` with the changefeed consumers,
//! the job status aggregator, and the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::collectors::{Counter, CounterVec, GaugeVec, Summary};
use crate::error::{BoxError, CollectError};
use crate::exposition::Encoder;

/// Source of the live crawl queue length, asked on every scrape.
#[async_trait]
pub trait QueueLength: Send + Sync {
    async fn queue_length(&self) -> Result<i64, BoxError>;
}

struct QueueGauge {
    source: Arc<dyn QueueLength>,
    timeout: Duration,
}

pub struct Registry {
    version: String,

    pub uri_requests: Counter,
    pub uri_requests_failed: Counter,
    pub uri_statuscode: CounterVec,
    pub uri_mime: CounterVec,
    pub uri_record_type: CounterVec,
    pub uri_fetch_time: Summary,
    pub uri_size: Summary,

    pub page_requests: Counter,
    pub page_outlinks: Summary,
    pub page_resources: Summary,
    pub page_resources_cache_hit: Summary,
    pub page_resources_cache_miss: Summary,
    pub page_links: CounterVec,

    pub job_status: GaugeVec,
    pub job_size: GaugeVec,

    queue: Option<QueueGauge>,
}

impl Registry {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            uri_requests: Counter::default(),
            uri_requests_failed: Counter::default(),
            uri_statuscode: CounterVec::new(&["code"]),
            uri_mime: CounterVec::new(&["mime"]),
            uri_record_type: CounterVec::new(&["type"]),
            uri_fetch_time: Summary::default(),
            uri_size: Summary::default(),
            page_requests: Counter::default(),
            page_outlinks: Summary::default(),
            page_resources: Summary::default(),
            page_resources_cache_hit: Summary::default(),
            page_resources_cache_miss: Summary::default(),
            page_links: CounterVec::new(&["type"]),
            job_status: GaugeVec::new(&["job_name", "status"]),
            job_size: GaugeVec::new(&["job_name", "type"]),
            queue: None,
        }
    }

    /// Expose `veidemann_uri_queue_count`, computed from `source` on every
    /// scrape and never cached.
    pub fn with_queue_length(mut self, source: Arc<dyn QueueLength>, timeout: Duration) -> Self {
        self.queue = Some(QueueGauge { source, timeout });
        self
    }

    /// Render every metric in the text exposition format.
    ///
    /// Fails only when the queue length cannot be fetched; that failure is
    /// fatal for the process.
    pub async fn gather(&self) -> Result<String, CollectError> {
        let queue_count = match &self.queue {
            Some(q) => {
                let count = tokio::time::timeout(q.timeout, q.source.queue_length())
                    .await
                    .map_err(|_| CollectError::Timeout {
                        operation: "queue length",
                        timeout: q.timeout,
                    })?
                    .map_err(CollectError::QueueLength)?;
                Some(count)
            }
            None => None,
        };

        let mut enc = Encoder::new();

        enc.gauge(
            "veidemann_exporter_build_info",
            "A metric with a constant '1' value labeled by the version of veidemann_exporter.",
            &[("version", self.version.as_str())],
            1.0,
        );

        enc.gauge_vec("veidemann_job_size_total", "Sizes for running jobs", &self.job_size);
        enc.gauge_vec("veidemann_job_status_total", "Status for running jobs", &self.job_status);

        enc.counter_vec(
            "veidemann_page_links_total",
            "Total number of outlinks and resources",
            &self.page_links,
        );
        enc.summary("veidemann_page_outlinks_total", "Outlinks per page", &self.page_outlinks);
        enc.counter(
            "veidemann_page_requests_total",
            "The total number of pages requested",
            &self.page_requests,
        );
        enc.summary(
            "veidemann_page_resources_cache_hit_total",
            "Resources loaded from cache per page",
            &self.page_resources_cache_hit,
        );
        enc.summary(
            "veidemann_page_resources_cache_miss_total",
            "Resources loaded from origin server per page",
            &self.page_resources_cache_miss,
        );
        enc.summary(
            "veidemann_page_resources_total",
            "Resources loaded per page",
            &self.page_resources,
        );

        enc.summary(
            "veidemann_uri_fetch_time_seconds",
            "The time used for fetching the uri in seconds",
            &self.uri_fetch_time,
        );
        enc.counter_vec(
            "veidemann_uri_mime_type_total",
            "The total number of responses for each mime type",
            &self.uri_mime,
        );
        if let Some(count) = queue_count {
            enc.gauge(
                "veidemann_uri_queue_count",
                "Number of uris in queue.",
                &[],
                count as f64,
            );
        }
        enc.counter_vec(
            "veidemann_uri_record_type_total",
            "The total number of responses for each record type",
            &self.uri_record_type,
        );
        enc.counter(
            "veidemann_uri_requests_failed_total",
            "The total number of failed uri requests",
            &self.uri_requests_failed,
        );
        enc.counter(
            "veidemann_uri_requests_total",
            "The total number of uris requested",
            &self.uri_requests,
        );
        enc.summary(
            "veidemann_uri_size_bytes",
            "Fetched content size in bytes",
            &self.uri_size,
        );
        enc.counter_vec(
            "veidemann_uri_statuscode_total",
            "The total number of responses for each status code",
            &self.uri_statuscode,
        );

        Ok(enc.finish())
    }
}
