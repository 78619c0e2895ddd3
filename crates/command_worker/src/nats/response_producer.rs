use anyhow::{Context, Result};
use common::domain::ResponseEnvelope;
use common::nats::JetStreamPublisher;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Publishes response envelopes as JSON to `{stream}.{aggregate id}`
pub struct ResponseProducer {
    jetstream: Arc<dyn JetStreamPublisher>,
    stream: String,
}

impl ResponseProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, stream: String) -> Self {
        Self { jetstream, stream }
    }

    pub async fn publish(&self, response: &ResponseEnvelope) -> Result<()> {
        let payload = serde_json::to_vec(response).context("failed to encode response")?;
        let subject = format!("{}.{}", self.stream, response.aggregate_id);

        debug!(
            subject = %subject,
            correlation_id = %response.correlation_id,
            size_bytes = payload.len(),
            "publishing response"
        );

        self.jetstream
            .publish(subject, payload.into())
            .await
            .context("failed to publish response")?;
        Ok(())
    }

    /// Drain `responses` until cancellation or until every sender is gone.
    /// A failed publish is logged and the response dropped.
    pub async fn run(
        self,
        mut responses: mpsc::Receiver<ResponseEnvelope>,
        ctx: CancellationToken,
    ) -> Result<()> {
        info!(stream = %self.stream, "starting response producer");

        loop {
            let response = tokio::select! {
                _ = ctx.cancelled() => break,
                response = responses.recv() => match response {
                    Some(response) => response,
                    None => break,
                },
            };

            if let Err(e) = self.publish(&response).await {
                error!(
                    correlation_id = %response.correlation_id,
                    uuid = %response.uuid,
                    error = %e,
                    "dropping response"
                );
            }
        }

        info!(stream = %self.stream, "response producer stopped");
        Ok(())
    }
}
