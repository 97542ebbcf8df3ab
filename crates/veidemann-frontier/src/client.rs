//! Frontier connection and the `QueueCountTotal` unary call.

use std::time::Duration;

use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::error::FrontierError;
use crate::proto::CountResponse;

const QUEUE_COUNT_TOTAL: &str = "/veidemann.api.frontier.v1.Frontier/QueueCountTotal";

/// Cheap to clone; clones share the underlying HTTP/2 channel.
#[derive(Debug, Clone)]
pub struct FrontierClient {
    channel: Channel,
    timeout: Duration,
}

fn endpoint(host: &str, port: u16, timeout: Duration) -> Result<Endpoint, FrontierError> {
    let address = format!("http://{host}:{port}");
    let endpoint = Endpoint::from_shared(address.clone())
        .map_err(|source| FrontierError::InvalidAddress { address, source })?;
    Ok(endpoint.connect_timeout(timeout).timeout(timeout))
}

impl FrontierClient {
    /// Connect eagerly; fails if the Frontier is not reachable now.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, FrontierError> {
        let channel = endpoint(host, port, timeout)?
            .connect()
            .await
            .map_err(|source| FrontierError::Connect {
                address: format!("{host}:{port}"),
                source,
            })?;
        info!(%host, port, "connected to frontier");
        Ok(Self { channel, timeout })
    }

    /// Like [`connect`](Self::connect), retrying every `backoff` until the
    /// first success.
    pub async fn connect_with_retry(
        host: &str,
        port: u16,
        timeout: Duration,
        backoff: Duration,
    ) -> Result<Self, FrontierError> {
        let mut attempt = 1u32;
        loop {
            match Self::connect(host, port, timeout).await {
                Ok(client) => return Ok(client),
                Err(e) if e.is_retryable() => {
                    warn!(%host, port, attempt, error = %e, retry_in = ?backoff, "frontier not reachable, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A client that connects on first use.
    pub fn connect_lazy(host: &str, port: u16, timeout: Duration) -> Result<Self, FrontierError> {
        let channel = endpoint(host, port, timeout)?.connect_lazy();
        Ok(Self { channel, timeout })
    }

    /// Number of URIs currently queued in the Frontier.
    pub async fn queue_count_total(&self) -> Result<i64, FrontierError> {
        let response = tokio::time::timeout(self.timeout, self.call_queue_count_total())
            .await
            .map_err(|_| FrontierError::Timeout(self.timeout))??;

        let count = response.into_inner().count;
        debug!(count, "frontier queue count");
        Ok(count)
    }

    async fn call_queue_count_total(&self) -> Result<tonic::Response<CountResponse>, tonic::Status> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("frontier not ready: {e}")))?;

        let codec: ProstCodec<(), CountResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(QUEUE_COUNT_TOTAL);
        grpc.unary(tonic::Request::new(()), path, codec).await
    }
}
