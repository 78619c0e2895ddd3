use crate::domain::CommandSenders;
use common::domain::{CommandAction, CommandDelivery, DecodedCommand, UpstreamError};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, warn};

/// Tower service routing consumed commands onto the command channels.
///
/// The subject's last token names the channel (`<stream>.insert`, `<stream>.update`,
/// `<stream>.delete` or their aliases). A payload that fails to decode is still
/// delivered, as an upstream error, so the dispatcher sees and logs it.
#[derive(Clone)]
pub struct CommandIntakeService {
    senders: CommandSenders,
}

impl CommandIntakeService {
    pub fn new(senders: CommandSenders) -> Self {
        Self { senders }
    }
}

impl Service<ConsumeRequest> for CommandIntakeService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let senders = self.senders.clone();

        Box::pin(async move {
            let action: CommandAction = match req.subject_tail().parse() {
                Ok(action) => action,
                Err(e) => {
                    warn!(subject = %req.subject, error = %e, "dropping command with unknown action");
                    return Ok(ConsumeResponse::Ack);
                }
            };

            let delivery: CommandDelivery = serde_json::from_slice::<DecodedCommand>(&req.payload)
                .map_err(|e| UpstreamError::new(format!("failed to decode command: {}", e)));

            if let Ok(command) = &delivery {
                debug!(
                    action = %action,
                    correlation_id = %command.correlation_id,
                    uuid = %command.uuid,
                    "command received"
                );
            }

            match senders.for_action(action).send(delivery).await {
                Ok(()) => Ok(ConsumeResponse::Ack),
                Err(_) => Ok(ConsumeResponse::nak(format!("{} channel closed", action))),
            }
        })
    }
}
