use anyhow::Result;
use async_nats::jetstream;
use async_trait::async_trait;
use std::time::Duration;

/// Opens durable pull consumers on a stream
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Up to `max_messages`, returning early once `expires` elapses
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<jetstream::Message>>;
}

/// Publishes and waits for the server to persist the message
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()>;
}

/// Stream lookup and creation, used once at startup
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StreamAdmin: Send + Sync {
    async fn stream_exists(&self, stream_name: &str) -> Result<bool>;

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()>;
}
