//! Order to notification flow across all three services on one in-memory
//! broker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::StatusCode;
use axum_test::TestServer;
use eda_core::envelope::EventEnvelope;
use eda_core::event::InventoryReserved;
use eda_core::handler::HandlerRegistry;
use eda_runtime::{Publisher, Subscriber, SubscriberConfig};
use eda_services::config::TopicMap;
use eda_services::handlers::{InventoryHandler, NotificationHandler};
use eda_services::lifecycle::RunningSubscriber;
use eda_services::order::Order;
use eda_services::server::{AppState, build_router};
use eda_services::TopicRole;
use eda_testing::{InMemoryBroker, init_test_tracing};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INVENTORY_GROUP: &str = "inventory-service-group";
const NOTIFICATION_GROUP: &str = "notification-service-group";

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

#[tokio::test]
async fn order_reaches_notification_service() {
    init_test_tracing();
    let broker = InMemoryBroker::new();
    let topics = TopicMap::default();
    let order_created = topics.topic(TopicRole::OrderCreated);
    let inventory_reserved = topics.topic(TopicRole::InventoryReserved);
    let fast_poll = SubscriberConfig::default().poll_timeout(Duration::from_millis(10));
    let cancel = CancellationToken::new();

    // order service
    let (producer, reports) = broker.producer();
    let order_publisher = Arc::new(Publisher::new(
        producer,
        reports,
        tracing::info_span!("publisher", service = "order-service"),
    ));
    let server = TestServer::new(build_router(AppState::new(
        Arc::clone(&order_publisher),
        order_created,
        Duration::from_secs(5),
    )))
    .unwrap();

    // inventory service
    let (producer, reports) = broker.producer();
    let inventory_publisher = Arc::new(Publisher::new(
        producer,
        reports,
        tracing::info_span!("publisher", service = "inventory-service"),
    ));
    let mut inventory = Subscriber::new(
        broker.consumer(INVENTORY_GROUP),
        HandlerRegistry::new().with_handler(
            order_created,
            InventoryHandler::new(Arc::clone(&inventory_publisher), inventory_reserved),
        ),
        tracing::info_span!("subscriber", group = INVENTORY_GROUP),
    )
    .with_config(fast_poll);
    inventory.subscribe(&[order_created]).unwrap();
    let inventory = RunningSubscriber::start(inventory, cancel.child_token());

    // notification service
    let mut notification = Subscriber::new(
        broker.consumer(NOTIFICATION_GROUP),
        HandlerRegistry::new().with_handler(inventory_reserved, NotificationHandler::new()),
        tracing::info_span!("subscriber", group = NOTIFICATION_GROUP),
    )
    .with_config(fast_poll);
    notification.subscribe(&[inventory_reserved]).unwrap();
    let notification = RunningSubscriber::start(notification, cancel.child_token());

    let response = server
        .post("/api/v1/orders")
        .json(&json!({
            "customer_id": "customer-1",
            "items": [{"product_id": "p1", "quantity": 3, "unit_price_cents": 250}]
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let order: Order = response.json();

    wait_until(|| broker.committed_offset(INVENTORY_GROUP, order_created, 0) == Some(1)).await;
    wait_until(|| {
        broker.committed_offset(NOTIFICATION_GROUP, inventory_reserved, 0) == Some(1)
    })
    .await;

    let reserved = broker.records(inventory_reserved);
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].key_lossy(), order.id.to_string());
    let payload: InventoryReserved = EventEnvelope::decode(reserved[0].value())
        .unwrap()
        .decode_payload()
        .unwrap();
    assert_eq!(payload.order_id, order.id.to_string());
    assert_eq!(payload.items.len(), 1);
    assert_eq!(payload.items[0].quantity, 3);

    cancel.cancel();
    inventory.stop().await.unwrap();
    notification.stop().await.unwrap();
    inventory_publisher.close().await;
    order_publisher.close().await;
}
