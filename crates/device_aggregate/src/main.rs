mod config;

use aggregate_runner::Runner;
use anyhow::Context;
use command_worker::{CommandWorker, CommandWorkerConfig};
use common::domain::{DeviceStore, InMemoryDeviceStore};
use common::nats::{ensure_stream, stream_subjects, ConsumerSettings, NatsClient};
use common::postgres::{PostgresClient, PostgresDeviceStore};
use common::telemetry::{init_telemetry, shutdown_telemetry};
use config::{ServiceConfig, StoreBackend};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers = match init_telemetry(&config.telemetry()) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("failed to initialize telemetry: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        store_backend = ?config.store_backend,
        "starting device-aggregate service"
    );
    debug!("configuration: {:?}", config);

    let store = match create_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("failed to initialize device store: {:#}", e);
            std::process::exit(1);
        }
    };

    let nats_client = match connect_nats(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("failed to initialize nats: {:#}", e);
            std::process::exit(1);
        }
    };

    let worker = match CommandWorker::new(
        store,
        nats_client.create_consumer_client(),
        nats_client.create_publisher_client(),
        CommandWorkerConfig {
            consumer: ConsumerSettings {
                stream_name: config.nats_commands_stream.clone(),
                consumer_name: config.nats_consumer_name.clone(),
                subject_filter: stream_subjects(&config.nats_commands_stream),
                batch_size: config.nats_batch_size,
                max_wait: Duration::from_secs(config.nats_batch_wait_secs),
            },
            responses_stream: config.nats_responses_stream.clone(),
            channel_capacity: config.channel_capacity,
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("failed to initialize command worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();
    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner
        .with_closer(move || async move {
            info!("running cleanup tasks");
            if let Err(e) = nats_client.close().await {
                warn!("failed to close nats connection: {:#}", e);
            }
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs))
        .run()
        .await;
}

async fn create_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn DeviceStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("using in-memory device store, records are lost on restart");
            Ok(Arc::new(InMemoryDeviceStore::new()))
        }
        StoreBackend::Postgres => {
            let postgres_config = config.postgres();
            let client = PostgresClient::from_config(&postgres_config)?;
            tokio::time::timeout(config.startup_timeout(), client.ping())
                .await
                .context("timed out connecting to postgres")??;

            let store = PostgresDeviceStore::new(client, &postgres_config.table)?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

async fn connect_nats(config: &ServiceConfig) -> anyhow::Result<NatsClient> {
    let client = NatsClient::connect(&config.nats_url, config.startup_timeout()).await?;
    let admin = client.stream_admin();
    ensure_stream(admin.as_ref(), &config.nats_commands_stream, "Device aggregate commands").await?;
    ensure_stream(admin.as_ref(), &config.nats_responses_stream, "Device aggregate responses").await?;
    Ok(client)
}
