//! veidemann-metrics — crawl metrics collection and Prometheus exposition.
//!
//! # Architecture
//!
//! ```text
//! Registry (Arc, process lifetime)
//!   ├── uri.*  ← ChangeStreamConsumer (crawl_log changefeed)
//!   ├── page.* ← ChangeStreamConsumer (page_log changefeed)
//!   ├── job.*  ← JobStatusAggregator  (periodic poll)
//!   └── uri.queue_count ← QueueLength, computed per scrape
//!
//! Registry::gather() → text/plain; version=0.0.4 for /metrics
//! ```
//!
//! Every failure surfaced here is fatal; tasks return `CollectError` and
//! the binary exits.

pub mod aggregator;
pub mod collectors;
pub mod consumer;
pub mod error;
pub mod exposition;
pub mod registry;
pub mod status;

pub use aggregator::JobStatusAggregator;
pub use consumer::ChangeStreamConsumer;
pub use error::{BoxError, CollectError};
pub use exposition::CONTENT_TYPE;
pub use registry::{QueueLength, Registry};
pub use status::{AggregatedJobStatus, CrawlState, SizeCounter, StatusVector};
