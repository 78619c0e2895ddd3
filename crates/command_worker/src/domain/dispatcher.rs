use crate::domain::DeviceCommandService;
use common::domain::{CommandAction, CommandDelivery, ResponseEnvelope};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("service-context closed")]
    ServiceContextClosed,
}

/// Producer side of the three command channels
#[derive(Clone)]
pub struct CommandSenders {
    pub insert: mpsc::Sender<CommandDelivery>,
    pub update: mpsc::Sender<CommandDelivery>,
    pub delete: mpsc::Sender<CommandDelivery>,
}

impl CommandSenders {
    pub fn for_action(&self, action: CommandAction) -> &mpsc::Sender<CommandDelivery> {
        match action {
            CommandAction::Insert => &self.insert,
            CommandAction::Update => &self.update,
            CommandAction::Delete => &self.delete,
        }
    }
}

/// Consumer side of the three command channels
pub struct CommandReceivers {
    pub insert: mpsc::Receiver<CommandDelivery>,
    pub update: mpsc::Receiver<CommandDelivery>,
    pub delete: mpsc::Receiver<CommandDelivery>,
}

/// Create the insert/update/delete channels, each bounded to `capacity`
pub fn command_channels(capacity: usize) -> (CommandSenders, CommandReceivers) {
    let (insert_tx, insert_rx) = mpsc::channel(capacity);
    let (update_tx, update_rx) = mpsc::channel(capacity);
    let (delete_tx, delete_rx) = mpsc::channel(capacity);

    (
        CommandSenders {
            insert: insert_tx,
            update: update_tx,
            delete: delete_tx,
        },
        CommandReceivers {
            insert: insert_rx,
            update: update_rx,
            delete: delete_rx,
        },
    )
}

/// Fans commands out from the three channels to the command service.
///
/// Each accepted command is handled on its own task, so a slow store call or a full
/// response channel never holds up the other channels.
pub struct CommandDispatcher {
    service: Arc<DeviceCommandService>,
    receivers: CommandReceivers,
    responses: mpsc::Sender<ResponseEnvelope>,
}

impl CommandDispatcher {
    pub fn new(
        service: Arc<DeviceCommandService>,
        receivers: CommandReceivers,
        responses: mpsc::Sender<ResponseEnvelope>,
    ) -> Self {
        Self {
            service,
            receivers,
            responses,
        }
    }

    /// Serve the channels until `ctx` is cancelled. Cancellation is fatal.
    pub async fn run(self, ctx: CancellationToken) -> Result<(), DispatchError> {
        let Self {
            service,
            receivers,
            responses,
        } = self;
        let CommandReceivers {
            mut insert,
            mut update,
            mut delete,
        } = receivers;
        let (mut insert_open, mut update_open, mut delete_open) = (true, true, true);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    error!("service context closed, stopping dispatch");
                    return Err(DispatchError::ServiceContextClosed);
                }
                delivery = insert.recv(), if insert_open => match delivery {
                    Some(delivery) => dispatch(&service, &responses, CommandAction::Insert, delivery),
                    None => insert_open = channel_closed(CommandAction::Insert),
                },
                delivery = update.recv(), if update_open => match delivery {
                    Some(delivery) => dispatch(&service, &responses, CommandAction::Update, delivery),
                    None => update_open = channel_closed(CommandAction::Update),
                },
                delivery = delete.recv(), if delete_open => match delivery {
                    Some(delivery) => dispatch(&service, &responses, CommandAction::Delete, delivery),
                    None => delete_open = channel_closed(CommandAction::Delete),
                },
            }
        }
    }
}

fn channel_closed(action: CommandAction) -> bool {
    warn!(channel = %action, "command channel closed");
    false
}

fn dispatch(
    service: &Arc<DeviceCommandService>,
    responses: &mpsc::Sender<ResponseEnvelope>,
    action: CommandAction,
    delivery: CommandDelivery,
) {
    let command = match delivery {
        Ok(command) => command,
        Err(e) => {
            error!(channel = %action, error = %e, "skipping errored delivery");
            return;
        }
    };

    let span = info_span!(
        "device_command",
        action = %action,
        correlation_id = %command.correlation_id,
        uuid = %command.uuid,
    );
    let service = Arc::clone(service);
    let responses = responses.clone();

    tokio::spawn(
        async move {
            let response = service.handle(action, &command).await;
            debug!(success = response.is_success(), "command handled");
            if responses.send(response).await.is_err() {
                warn!("response channel closed, dropping response");
            }
        }
        .instrument(span),
    );
}
