//! Error type for the HTTP handlers.
//!
//! Bridges order validation and publish failures to HTTP responses through
//! Axum's `IntoResponse`.

use crate::order::OrderError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use eda_runtime::PublishError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP error returned by the order API.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl ApiError {
    /// Create a new error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// 502 Bad Gateway: the broker rejected the event.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message.into(), "PUBLISH_FAILED")
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE",
        )
    }

    /// 504 Gateway Timeout: no acknowledgment within the deadline.
    #[must_use]
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message.into(), "PUBLISH_TIMEOUT")
    }

    /// Status code of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code.to_string(),
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        let response = match &err {
            PublishError::Timeout { .. } => {
                Self::gateway_timeout("Order event was not acknowledged in time")
            },
            PublishError::Delivery(_) | PublishError::Enqueue(_) => {
                Self::bad_gateway("Order event was rejected by the broker")
            },
            PublishError::Cancelled { .. } | PublishError::Closed => {
                Self::unavailable("Order service is shutting down")
            },
            PublishError::Encode(_) => Self::internal("Failed to process order"),
        };
        response.with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_core::broker::BrokerError;

    #[test]
    fn test_error_display() {
        let err = ApiError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_order_errors_are_bad_requests() {
        let err = ApiError::from(OrderError::NoItems);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_publish_error_mapping() {
        let timeout = ApiError::from(PublishError::Timeout {
            topic: "order.created".to_string(),
        });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.code(), "PUBLISH_TIMEOUT");

        let delivery = ApiError::from(PublishError::Delivery(BrokerError::Delivery {
            topic: "order.created".to_string(),
            reason: "not leader".to_string(),
        }));
        assert_eq!(delivery.status(), StatusCode::BAD_GATEWAY);

        let closed = ApiError::from(PublishError::Closed);
        assert_eq!(closed.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
