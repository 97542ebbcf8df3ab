use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("invalid frontier address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("frontier unreachable at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("frontier call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("frontier call timed out after {0:?}")]
    Timeout(Duration),
}

impl FrontierError {
    /// Whether waiting and trying again could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FrontierError::Connect { .. } | FrontierError::Timeout(_))
    }
}
