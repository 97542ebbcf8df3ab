//! Frontier-backed queue length for `veidemann_uri_queue_count`.

use async_trait::async_trait;
use veidemann_frontier::FrontierClient;
use veidemann_metrics::{BoxError, QueueLength};

pub struct FrontierQueue {
    client: FrontierClient,
}

impl FrontierQueue {
    pub fn new(client: FrontierClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueueLength for FrontierQueue {
    async fn queue_length(&self) -> Result<i64, BoxError> {
        self.client.queue_count_total().await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_frontier_is_an_error() {
        let client =
            FrontierClient::connect_lazy("127.0.0.1", 1, Duration::from_millis(200)).unwrap();
        let queue = FrontierQueue::new(client);
        assert!(queue.queue_length().await.is_err());
    }
}
