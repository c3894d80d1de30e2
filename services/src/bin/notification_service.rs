//! Notification service.
//!
//! Notifies customers once `inventory.reserved` arrives for their order.

use anyhow::Context as _;
use eda_core::handler::HandlerRegistry;
use eda_redpanda::KafkaConsumer;
use eda_runtime::{Subscriber, SubscriberConfig};
use eda_services::handlers::NotificationHandler;
use eda_services::lifecycle::{RunningSubscriber, ShutdownReason};
use eda_services::{Config, TopicRole, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::info;

const SERVICE: &str = "notification-service";
const GROUP_ID: &str = "notification-service-group";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init(&config.logger).context("Failed to initialize logging")?;

    info!(
        brokers = ?config.kafka.brokers,
        group_id = GROUP_ID,
        config_file = ?config.source_file,
        "Starting Notification Service"
    );

    let kafka = config.kafka.client_config(SERVICE)?;
    let consumer = KafkaConsumer::new(&kafka, GROUP_ID).context("Failed to create Kafka consumer")?;

    let inventory_reserved = config.kafka.topics.topic(TopicRole::InventoryReserved);
    let registry =
        HandlerRegistry::new().with_handler(inventory_reserved, NotificationHandler::new());

    let mut subscriber = Subscriber::new(
        consumer,
        registry,
        tracing::info_span!("subscriber", service = SERVICE, group = GROUP_ID),
    )
    .with_config(SubscriberConfig::default().handler_timeout(config.kafka.handler_timeout));
    subscriber
        .subscribe(&[inventory_reserved])
        .context("Failed to subscribe to topics")?;

    let mut running = RunningSubscriber::start(subscriber, CancellationToken::new());
    info!("Notification Service is running and consuming messages...");

    let reason = running.wait_for_shutdown().await;
    info!("Shutting down Notification Service...");
    running.stop().await.context("Consume loop panicked")?;
    info!("Notification Service stopped");

    match reason {
        ShutdownReason::Signal => Ok(()),
        ShutdownReason::ConsumerFailed(error) => Err(error.into()),
    }
}
