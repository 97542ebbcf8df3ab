//! veidemann-exporter — Prometheus exporter for the Veidemann web crawler.
//!
//! # Architecture
//!
//! ```text
//! RethinkDB ─┬─ crawl_log changefeed ─► ChangeStreamConsumer ─┐
//!            ├─ page_log changefeed  ─► ChangeStreamConsumer ─┤
//!            └─ job tables (poll)    ─► JobStatusAggregator  ─┼─► Registry ─► GET /metrics
//! Frontier ──── QueueCountTotal (per scrape) ─────────────────┘
//! ```
//!
//! Any failure in a background task or a scrape terminates the process.

pub mod config;
pub mod logging;
pub mod queue;
pub mod server;

pub use config::{Config, ConfigError, LogFormat};
pub use queue::FrontierQueue;
pub use server::{AppState, build_router};

/// Reported by `veidemann_exporter_build_info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
