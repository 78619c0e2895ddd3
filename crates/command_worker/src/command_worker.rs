use crate::domain::{command_channels, CommandDispatcher, DeviceCommandService};
use crate::nats::{CommandIntakeService, ResponseProducer};
use aggregate_runner::{AppProcess, BoxedProcessFuture};
use common::domain::{DeviceStore, ResponseEnvelope};
use common::nats::{
    ConsumeLoggingLayer, ConsumeLoggingService, ConsumerSettings, JetStreamConsumer,
    JetStreamPublisher, TowerConsumer,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tracing::info;

pub struct CommandWorkerConfig {
    pub consumer: ConsumerSettings,
    pub responses_stream: String,
    pub channel_capacity: usize,
}

/// The device command pipeline: NATS intake, dispatch loop and response publishing
pub struct CommandWorker {
    consumer: TowerConsumer<ConsumeLoggingService<CommandIntakeService>>,
    dispatcher: CommandDispatcher,
    producer: ResponseProducer,
    responses: mpsc::Receiver<ResponseEnvelope>,
}

impl CommandWorker {
    pub async fn new(
        store: Arc<dyn DeviceStore>,
        consumer_client: Arc<dyn JetStreamConsumer>,
        publisher_client: Arc<dyn JetStreamPublisher>,
        config: CommandWorkerConfig,
    ) -> anyhow::Result<Self> {
        let (senders, receivers) = command_channels(config.channel_capacity);
        let (response_tx, response_rx) = mpsc::channel(config.channel_capacity);

        let service = Arc::new(DeviceCommandService::new(store));
        let dispatcher = CommandDispatcher::new(service, receivers, response_tx);

        let intake = ConsumeLoggingLayer::new().layer(CommandIntakeService::new(senders));
        let consumer = TowerConsumer::new(consumer_client, config.consumer, intake).await?;

        let producer = ResponseProducer::new(publisher_client, config.responses_stream);

        info!("command worker initialized");
        Ok(Self {
            consumer,
            dispatcher,
            producer,
            responses: response_rx,
        })
    }

    pub fn into_runner_processes(self) -> Vec<(String, AppProcess)> {
        let Self {
            consumer,
            dispatcher,
            producer,
            responses,
        } = self;

        vec![
            (
                "command-consumer".to_string(),
                Box::new(move |ctx: CancellationToken| -> BoxedProcessFuture {
                    Box::pin(async move { consumer.run(ctx).await })
                }) as AppProcess,
            ),
            (
                "command-dispatcher".to_string(),
                Box::new(move |ctx: CancellationToken| -> BoxedProcessFuture {
                    Box::pin(async move { Ok(dispatcher.run(ctx).await?) })
                }) as AppProcess,
            ),
            (
                "response-producer".to_string(),
                Box::new(move |ctx: CancellationToken| -> BoxedProcessFuture {
                    Box::pin(async move { producer.run(responses, ctx).await })
                }) as AppProcess,
            ),
        ]
    }
}
