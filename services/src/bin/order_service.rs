//! Order service.
//!
//! Accepts orders over HTTP and publishes `order.created`.

use anyhow::Context as _;
use eda_redpanda::KafkaProducer;
use eda_runtime::Publisher;
use eda_services::lifecycle::wait_for_signal;
use eda_services::server::{AppState, build_router};
use eda_services::{Config, TopicRole, telemetry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SERVICE: &str = "order-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init(&config.logger).context("Failed to initialize logging")?;

    info!(
        brokers = ?config.kafka.brokers,
        address = %config.server.address(),
        config_file = ?config.source_file,
        "Starting Order Service"
    );

    let kafka = config.kafka.client_config(SERVICE)?;
    let (producer, reports) =
        KafkaProducer::new(&kafka).context("Failed to create Kafka producer")?;
    let publisher = Arc::new(Publisher::new(
        producer,
        reports,
        tracing::info_span!("publisher", service = SERVICE),
    ));

    let state = AppState::new(
        Arc::clone(&publisher),
        config.kafka.topics.topic(TopicRole::OrderCreated),
        config.server.publish_timeout,
    );
    let app = build_router(state);

    let addr = config.server.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    let shutdown = CancellationToken::new();
    let drained = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { drained.cancelled().await })
            .await
    });

    let finished_early = tokio::select! {
        () = wait_for_signal() => None,
        result = &mut server => Some(result),
    };
    let server_result = match finished_early {
        Some(result) => Some(result),
        None => {
            info!("Shutting down server...");
            shutdown.cancel();
            tokio::time::timeout(config.server.shutdown_timeout, &mut server)
                .await
                .ok()
        },
    };

    match server_result {
        Some(Ok(Ok(()))) => info!("Server stopped"),
        Some(Ok(Err(e))) => error!(error = %e, "Server failed"),
        Some(Err(e)) => error!(error = %e, "Server task failed"),
        None => {
            warn!("Server forced to shut down");
            server.abort();
        },
    }

    publisher.close().await;
    info!("Order Service stopped");
    Ok(())
}
