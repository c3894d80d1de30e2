//! HTTP API tests for the order service.
//!
//! The router runs in-process against the in-memory broker, so every test
//! can inspect exactly what was published.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::StatusCode;
use axum_test::TestServer;
use eda_core::envelope::EventEnvelope;
use eda_core::event::OrderCreated;
use eda_runtime::{Publisher, TIMESTAMP_HEADER};
use eda_services::order::{Order, OrderStatus};
use eda_services::server::error::ErrorResponse;
use eda_services::server::health::HealthResponse;
use eda_services::server::orders::OrderStatusResponse;
use eda_services::server::{AppState, build_router};
use eda_testing::{InMemoryBroker, InMemoryProducer, init_test_tracing, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "order.created";

fn server(
    broker: &InMemoryBroker,
    publish_timeout: Duration,
    configure: impl FnOnce(InMemoryProducer) -> InMemoryProducer,
) -> (TestServer, Arc<Publisher<InMemoryProducer>>) {
    init_test_tracing();
    let (producer, reports) = broker.producer();
    let publisher = Arc::new(Publisher::new(
        configure(producer),
        reports,
        tracing::info_span!("publisher"),
    ));
    let state = AppState::new(Arc::clone(&publisher), TOPIC, publish_timeout)
        .with_clock(Arc::new(test_clock()));
    let server = TestServer::new(build_router(state)).expect("test server");
    (server, publisher)
}

fn valid_order() -> serde_json::Value {
    json!({
        "customer_id": "customer-1",
        "items": [
            {"product_id": "p1", "quantity": 2, "unit_price_cents": 1999},
            {"product_id": "p2", "quantity": 1, "unit_price_cents": 500}
        ]
    })
}

#[tokio::test]
async fn create_order_publishes_order_created() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_secs(5), |p| p);

    let response = server.post("/api/v1/orders").json(&valid_order()).await;

    response.assert_status(StatusCode::CREATED);
    let order: Order = response.json();
    assert_eq!(order.customer_id, "customer-1");
    assert_eq!(order.total_cents, 4_498);
    assert_eq!(order.status, OrderStatus::Pending);

    let records = broker.records(TOPIC);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key_lossy(), order.id.to_string());
    assert!(records[0].header(TIMESTAMP_HEADER).is_some());

    let event: OrderCreated = EventEnvelope::decode(records[0].value())
        .unwrap()
        .decode_payload()
        .unwrap();
    assert_eq!(event.order_id, order.id.to_string());
    assert_eq!(event.customer_id.as_deref(), Some("customer-1"));
    assert_eq!(event.total_cents, Some(4_498));
    assert_eq!(event.items.len(), 2);

    publisher.close().await;
}

#[tokio::test]
async fn decimal_price_is_accepted_as_cents() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_secs(5), |p| p);

    let response = server
        .post("/api/v1/orders")
        .json(&json!({
            "customer_id": "customer-1",
            "items": [
                {"product_id": "p1", "quantity": 2, "price": 19.99},
                {"product_id": "p2", "quantity": 1, "price": 5.0}
            ]
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let order: Order = response.json();
    assert_eq!(order.items[0].unit_price_cents, 1_999);
    assert_eq!(order.total_cents, 4_498);

    publisher.close().await;
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_secs(5), |p| p);

    let response = server
        .post("/api/v1/orders")
        .json(&json!({"customer_id": "customer-1"}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert_eq!(body.code, "BAD_REQUEST");
    assert!(broker.records(TOPIC).is_empty());

    publisher.close().await;
}

#[tokio::test]
async fn invalid_order_is_bad_request() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_secs(5), |p| p);

    for body in [
        json!({"customer_id": "", "items": [{"product_id": "p1", "quantity": 1, "unit_price_cents": 1}]}),
        json!({"customer_id": "customer-1", "items": []}),
        json!({"customer_id": "customer-1", "items": [{"product_id": "", "quantity": 1, "unit_price_cents": 1}]}),
        json!({"customer_id": "customer-1", "items": [{"product_id": "p1", "quantity": 0, "unit_price_cents": 1}]}),
        json!({"customer_id": "customer-1", "items": [{"product_id": "p1", "quantity": -1, "unit_price_cents": 1}]}),
    ] {
        let response = server.post("/api/v1/orders").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
    assert!(broker.records(TOPIC).is_empty());

    publisher.close().await;
}

#[tokio::test]
async fn delivery_failure_is_bad_gateway() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_secs(5), |p| {
        p.failing_deliveries("not enough replicas")
    });

    let response = server.post("/api/v1/orders").json(&valid_order()).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: ErrorResponse = response.json();
    assert_eq!(body.code, "PUBLISH_FAILED");

    publisher.close().await;
}

#[tokio::test]
async fn unacknowledged_publish_is_gateway_timeout() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_millis(50), |p| p.holding_deliveries());

    let response = server.post("/api/v1/orders").json(&valid_order()).await;

    response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    let body: ErrorResponse = response.json();
    assert_eq!(body.code, "PUBLISH_TIMEOUT");
    assert_eq!(publisher.pending_acks(), 0);
}

#[tokio::test]
async fn get_order_reports_pending() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_secs(5), |p| p);

    let response = server.get("/api/v1/orders/order-42").await;

    response.assert_status_ok();
    let body: OrderStatusResponse = response.json();
    assert_eq!(body.order_id, "order-42");
    assert_eq!(body.status, OrderStatus::Pending);

    publisher.close().await;
}

#[tokio::test]
async fn health_check_is_ok() {
    let broker = InMemoryBroker::new();
    let (server, publisher) = server(&broker, Duration::from_secs(5), |p| p);

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: HealthResponse = response.json();
    assert_eq!(body.status, "healthy");
    assert_eq!(body.service, "order-service");

    publisher.close().await;
}
