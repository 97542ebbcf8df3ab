use std::time::Duration;

use thiserror::Error;
use veidemann_store::{StoreError, Table};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fatal collection failures. Any of these ends the process.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{table} changefeed terminated")]
    StreamClosed { table: Table },

    #[error("queue length unavailable: {0}")]
    QueueLength(#[source] BoxError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}
