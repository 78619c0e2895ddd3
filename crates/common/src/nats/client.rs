use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, PullConsumer, StreamAdmin};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, context::GetStreamErrorKind, ErrorCode};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Connection to the NATS server and its JetStream context.
///
/// Hands out the trait objects the worker runs on, so everything past startup
/// can be exercised against mocks.
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "connecting to nats");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .with_context(|| format!("failed to connect to nats at {}", url))?;
        let jetstream = jetstream::new(client.clone());

        info!("connected to nats");
        Ok(Self { client, jetstream })
    }

    pub fn stream_admin(&self) -> Arc<dyn StreamAdmin> {
        Arc::new(JetStreamHandle(self.jetstream.clone()))
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(JetStreamHandle(self.jetstream.clone()))
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(JetStreamHandle(self.jetstream.clone()))
    }

    /// Flush pending publishes before the connection is dropped
    pub async fn close(self) -> Result<()> {
        info!("closing nats connection");
        self.client
            .flush()
            .await
            .context("failed to flush nats connection")
    }
}

/// JetStream context behind the stream, consumer and publisher seams
struct JetStreamHandle(jetstream::Context);

#[async_trait]
impl StreamAdmin for JetStreamHandle {
    async fn stream_exists(&self, stream_name: &str) -> Result<bool> {
        match self.0.get_stream(stream_name).await {
            Ok(_) => Ok(true),
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(source)
                    if source.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(false)
                }
                _ => Err(anyhow::Error::new(e)
                    .context(format!("failed to look up stream {}", stream_name))),
            },
        }
    }

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()> {
        self.0.create_stream(config).await?;
        Ok(())
    }
}

#[async_trait]
impl JetStreamConsumer for JetStreamHandle {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .0
            .create_consumer_on_stream(config, stream_name)
            .await
            .with_context(|| format!("failed to create consumer on {}", stream_name))?;

        Ok(Box::new(DurablePull(consumer)))
    }
}

#[async_trait]
impl JetStreamPublisher for JetStreamHandle {
    #[instrument(skip(self, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()> {
        self.0
            .publish(subject, payload)
            .await
            .context("failed to publish message to jetstream")?
            .await
            .context("jetstream did not acknowledge the message")?;
        Ok(())
    }
}

struct DurablePull(jetstream::consumer::PullConsumer);

#[async_trait]
impl PullConsumer for DurablePull {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<jetstream::Message>> {
        let batch = self
            .0
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("failed to fetch messages")?;

        // A broken message is skipped; the rest of the batch is still delivered
        let messages = batch
            .filter_map(|msg| async move {
                msg.inspect_err(|e| warn!(error = %e, "dropping unreadable message from batch"))
                    .ok()
            })
            .collect()
            .await;
        Ok(messages)
    }
}
