//! Shared state of the order API.

use eda_core::broker::ProducerClient;
use eda_core::environment::{Clock, SystemClock};
use eda_runtime::Publisher;
use std::sync::Arc;
use std::time::Duration;

/// State handed to every order API handler.
pub struct AppState<P: ProducerClient> {
    /// Publisher for `order.created`
    pub publisher: Arc<Publisher<P>>,
    /// Topic `order.created` is published to
    pub order_created_topic: String,
    /// Deadline for the broker acknowledgment of a request's event
    pub publish_timeout: Duration,
    /// Time source for order timestamps
    pub clock: Arc<dyn Clock>,
}

impl<P: ProducerClient> AppState<P> {
    /// Create state with the system clock.
    #[must_use]
    pub fn new(
        publisher: Arc<Publisher<P>>,
        order_created_topic: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            order_created_topic: order_created_topic.into(),
            publish_timeout,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl<P: ProducerClient> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
            order_created_topic: self.order_created_topic.clone(),
            publish_timeout: self.publish_timeout,
            clock: Arc::clone(&self.clock),
        }
    }
}
