//! Router configuration for the order service.

use super::health::health_check;
use super::orders::{create_order, get_order_status};
use super::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use eda_core::broker::ProducerClient;

/// Build the order service router.
///
/// ```text
/// GET  /health
/// POST /api/v1/orders
/// GET  /api/v1/orders/:id
/// ```
pub fn build_router<P: ProducerClient>(state: AppState<P>) -> Router {
    let api_routes = Router::new()
        .route("/orders", post(create_order::<P>))
        .route("/orders/:id", get(get_order_status));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .with_state(state)
}
