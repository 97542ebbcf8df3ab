//! veidemann-frontier — client for the crawler Frontier gRPC service.
//!
//! The exporter needs a single call, `QueueCountTotal`, to report how many
//! URIs are waiting in the crawl queue.
//!
//! ```text
//! FrontierClient
//!   └── queue_count_total()
//!         └── /veidemann.api.frontier.v1.Frontier/QueueCountTotal
//!               google.protobuf.Empty → CountResponse { count }
//! ```

pub mod client;
pub mod error;

/// Protobuf messages used by the Frontier calls.
pub mod proto {
    /// Response of `QueueCountTotal`.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct CountResponse {
        #[prost(int64, tag = "1")]
        pub count: i64,
    }
}

pub use client::FrontierClient;
pub use error::FrontierError;
