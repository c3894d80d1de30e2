//! Inventory service.
//!
//! Reserves stock for every `order.created` and publishes
//! `inventory.reserved`.

use anyhow::Context as _;
use eda_core::handler::HandlerRegistry;
use eda_redpanda::{KafkaConsumer, KafkaProducer};
use eda_runtime::{Publisher, Subscriber, SubscriberConfig};
use eda_services::handlers::InventoryHandler;
use eda_services::lifecycle::{RunningSubscriber, ShutdownReason};
use eda_services::{Config, TopicRole, telemetry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SERVICE: &str = "inventory-service";
const GROUP_ID: &str = "inventory-service-group";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init(&config.logger).context("Failed to initialize logging")?;

    info!(
        brokers = ?config.kafka.brokers,
        group_id = GROUP_ID,
        config_file = ?config.source_file,
        "Starting Inventory Service"
    );

    let kafka = config.kafka.client_config(SERVICE)?;
    let (producer, reports) =
        KafkaProducer::new(&kafka).context("Failed to create Kafka producer")?;
    let publisher = Arc::new(Publisher::new(
        producer,
        reports,
        tracing::info_span!("publisher", service = SERVICE),
    ));
    let consumer = KafkaConsumer::new(&kafka, GROUP_ID).context("Failed to create Kafka consumer")?;

    let order_created = config.kafka.topics.topic(TopicRole::OrderCreated);
    let registry = HandlerRegistry::new().with_handler(
        order_created,
        InventoryHandler::new(
            Arc::clone(&publisher),
            config.kafka.topics.topic(TopicRole::InventoryReserved),
        ),
    );

    let mut subscriber = Subscriber::new(
        consumer,
        registry,
        tracing::info_span!("subscriber", service = SERVICE, group = GROUP_ID),
    )
    .with_config(SubscriberConfig::default().handler_timeout(config.kafka.handler_timeout));
    subscriber
        .subscribe(&[order_created])
        .context("Failed to subscribe to topics")?;

    let mut running = RunningSubscriber::start(subscriber, CancellationToken::new());
    info!("Inventory Service is running and consuming messages...");

    let reason = running.wait_for_shutdown().await;
    info!("Shutting down Inventory Service...");
    running.stop().await.context("Consume loop panicked")?;
    publisher.close().await;
    info!("Inventory Service stopped");

    match reason {
        ShutdownReason::Signal => Ok(()),
        ShutdownReason::ConsumerFailed(error) => Err(error.into()),
    }
}
