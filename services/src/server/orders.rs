//! Order API endpoints.
//!
//! - POST /api/v1/orders - Accept an order and publish `order.created`
//! - GET /api/v1/orders/:id - Order status (mock, always `pending`)

use super::error::ApiError;
use super::state::AppState;
use crate::order::{CreateOrderRequest, Order, OrderStatus};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use eda_core::broker::ProducerClient;
use eda_core::context::Context;
use eda_core::event::DomainEvent;
use serde::{Deserialize, Serialize};

/// Response of `GET /api/v1/orders/:id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    /// Requested order
    pub order_id: String,
    /// Reported status
    pub status: OrderStatus,
    /// Explanation
    pub message: String,
}

/// Accept an order.
///
/// The order is validated, given a fresh id and announced on the
/// `order.created` topic keyed by that id. The response is only sent once
/// the broker has acknowledged the event.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/v1/orders \
///   -H "Content-Type: application/json" \
///   -d '{
///     "customer_id": "customer-1",
///     "items": [{"product_id": "p1", "quantity": 2, "unit_price_cents": 1999}]
///   }'
/// ```
///
/// # Errors
///
/// - 400 if the body is malformed or fails validation
/// - 502 if the broker rejected the event
/// - 504 if no acknowledgment arrived within the publish timeout
pub async fn create_order<P: ProducerClient>(
    State(state): State<AppState<P>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "Invalid request body");
        ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let order = Order::place(request, state.clock.as_ref()).inspect_err(|error| {
        tracing::warn!(error = %error, "Order rejected");
    })?;

    let ctx = Context::background().with_timeout(state.publish_timeout);
    let event = DomainEvent::from(order.created_event());
    let key = order.id.to_string();
    state
        .publisher
        .publish_event(&ctx, &state.order_created_topic, &key, &event)
        .await?;

    tracing::info!(
        order_id = %order.id,
        customer_id = %order.customer_id,
        total_cents = order.total_cents,
        "Order created"
    );
    Ok((StatusCode::CREATED, Json(order)))
}

/// Report the status of an order.
///
/// There is no order store; every id is reported as `pending`.
#[allow(clippy::unused_async)]
pub async fn get_order_status(Path(order_id): Path<String>) -> Json<OrderStatusResponse> {
    Json(OrderStatusResponse {
        order_id,
        status: OrderStatus::Pending,
        message: "Order status is not tracked; every order reports pending".to_string(),
    })
}
