//! Inventory reservation on `order.created`.

use eda_core::broker::{MessageRecord, ProducerClient};
use eda_core::context::Context;
use eda_core::envelope::EventEnvelope;
use eda_core::environment::{Clock, SystemClock};
use eda_core::event::{DomainEvent, InventoryReserved, OrderCreated, Reservation};
use eda_core::handler::{HandlerError, HandlerFuture, MessageHandler};
use eda_runtime::{PublishError, Publisher};
use std::sync::Arc;

/// Reserves stock for every new order and announces the reservation.
///
/// Reservation always succeeds; there is no stock ledger. The
/// `inventory.reserved` event is keyed by order id and published under the
/// handler's own deadline, so an unacknowledged publish fails the record and
/// leaves it uncommitted.
pub struct InventoryHandler<P: ProducerClient> {
    publisher: Arc<Publisher<P>>,
    reserved_topic: String,
    clock: Arc<dyn Clock>,
}

impl<P: ProducerClient> InventoryHandler<P> {
    /// Create a handler publishing to `reserved_topic`.
    #[must_use]
    pub fn new(publisher: Arc<Publisher<P>>, reserved_topic: impl Into<String>) -> Self {
        Self {
            publisher,
            reserved_topic: reserved_topic.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for `reserved_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn reserve(&self, order: &OrderCreated) -> InventoryReserved {
        InventoryReserved {
            order_id: order.order_id.clone(),
            items: order
                .items
                .iter()
                .map(|line| Reservation {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                })
                .collect(),
            reserved_at: self.clock.now(),
        }
    }

    async fn process(&self, ctx: &Context, record: &MessageRecord) -> Result<(), HandlerError> {
        let order: OrderCreated = EventEnvelope::decode(record.value())?.decode_payload()?;
        tracing::info!(
            order_id = %order.order_id,
            customer_id = order.customer_id.as_deref().unwrap_or_default(),
            items = order.items.len(),
            "Processing order created event"
        );

        let reserved = DomainEvent::from(self.reserve(&order));
        self.publisher
            .publish_event(ctx, &self.reserved_topic, &order.order_id, &reserved)
            .await
            .map_err(|error| match error {
                PublishError::Cancelled { .. } => HandlerError::Cancelled,
                other => HandlerError::Other(
                    anyhow::Error::new(other).context("Failed to publish inventory reservation"),
                ),
            })?;

        tracing::info!(order_id = %order.order_id, "Inventory reserved");
        Ok(())
    }
}

impl<P: ProducerClient> MessageHandler for InventoryHandler<P> {
    fn handle<'a>(&'a self, ctx: &'a Context, record: &'a MessageRecord) -> HandlerFuture<'a> {
        Box::pin(self.process(ctx, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_core::event::OrderLine;
    use eda_testing::{InMemoryBroker, test_clock};
    use std::time::Duration;

    fn order_record(order_id: &str) -> MessageRecord {
        let event = DomainEvent::from(OrderCreated::new(
            order_id,
            vec![OrderLine::new("p1", 2), OrderLine::new("p2", 1)],
        ));
        let value = EventEnvelope::from_event(&event, &test_clock())
            .unwrap()
            .encode()
            .unwrap();
        MessageRecord::new("order.created", 0, 0, Some(order_id.as_bytes().to_vec()), value)
    }

    #[tokio::test]
    async fn test_publishes_reservation_keyed_by_order() {
        let broker = InMemoryBroker::new();
        let (producer, reports) = broker.producer();
        let publisher = Arc::new(Publisher::new(producer, reports, tracing::Span::none()));
        let handler = InventoryHandler::new(Arc::clone(&publisher), "inventory.reserved")
            .with_clock(Arc::new(test_clock()));

        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        handler.handle(&ctx, &order_record("order-7")).await.unwrap();

        let records = broker.records("inventory.reserved");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key(), Some(&b"order-7"[..]));
        let reserved: InventoryReserved = EventEnvelope::decode(records[0].value())
            .unwrap()
            .decode_payload()
            .unwrap();
        assert_eq!(reserved.order_id, "order-7");
        assert_eq!(reserved.reserved_at, test_clock().now());
        assert_eq!(
            reserved.items,
            vec![
                Reservation {
                    product_id: "p1".to_string(),
                    quantity: 2
                },
                Reservation {
                    product_id: "p2".to_string(),
                    quantity: 1
                },
            ]
        );
        publisher.close().await;
    }

    #[tokio::test]
    async fn test_undecodable_record_fails() {
        let broker = InMemoryBroker::new();
        let (producer, reports) = broker.producer();
        let publisher = Arc::new(Publisher::new(producer, reports, tracing::Span::none()));
        let handler = InventoryHandler::new(Arc::clone(&publisher), "inventory.reserved");

        let record = MessageRecord::new("order.created", 0, 0, None, b"not json".to_vec());
        let err = handler
            .handle(&Context::background(), &record)
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Decode(_)));
        assert!(broker.records("inventory.reserved").is_empty());
        publisher.close().await;
    }

    #[tokio::test]
    async fn test_rejected_publish_fails_handler() {
        let broker = InMemoryBroker::new();
        let (producer, reports) = broker.producer();
        let publisher = Arc::new(Publisher::new(
            producer.failing_deliveries("leader not available"),
            reports,
            tracing::Span::none(),
        ));
        let handler = InventoryHandler::new(Arc::clone(&publisher), "inventory.reserved");

        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let err = handler
            .handle(&ctx, &order_record("order-8"))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Other(_)));
        publisher.close().await;
    }
}
