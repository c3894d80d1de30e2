//! Customer notification on `inventory.reserved`.

use eda_core::broker::MessageRecord;
use eda_core::context::Context;
use eda_core::envelope::EventEnvelope;
use eda_core::event::InventoryReserved;
use eda_core::handler::{HandlerError, HandlerFuture, MessageHandler};

/// Notification kind sent once stock is reserved.
pub const ORDER_CONFIRMED: &str = "order_confirmed";

/// Tells the customer their order is confirmed.
///
/// Delivery is a structured log line; there is no email or push channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationHandler;

impl NotificationHandler {
    /// Create the handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn process(record: &MessageRecord) -> Result<(), HandlerError> {
        let reserved: InventoryReserved =
            EventEnvelope::decode(record.value())?.decode_payload()?;
        tracing::info!(
            order_id = %reserved.order_id,
            items = reserved.items.len(),
            "Processing inventory reserved event"
        );

        send_notification(&reserved.order_id);
        Ok(())
    }
}

fn send_notification(order_id: &str) {
    tracing::info!(
        order_id,
        notification_type = ORDER_CONFIRMED,
        message = "Your order has been confirmed and inventory has been reserved",
        "Notification sent"
    );
}

impl MessageHandler for NotificationHandler {
    fn handle<'a>(&'a self, _ctx: &'a Context, record: &'a MessageRecord) -> HandlerFuture<'a> {
        Box::pin(async move { Self::process(record) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_core::event::{DomainEvent, OrderCreated, Reservation};
    use eda_testing::test_clock;

    fn record(event: &DomainEvent) -> MessageRecord {
        let value = EventEnvelope::from_event(event, &test_clock())
            .unwrap()
            .encode()
            .unwrap();
        MessageRecord::new("inventory.reserved", 0, 3, Some(b"order-1".to_vec()), value)
    }

    #[tokio::test]
    async fn test_inventory_reserved_is_handled() {
        let event = DomainEvent::from(InventoryReserved {
            order_id: "order-1".to_string(),
            items: vec![Reservation {
                product_id: "p1".to_string(),
                quantity: 2,
            }],
            reserved_at: eda_core::environment::Clock::now(&test_clock()),
        });

        NotificationHandler::new()
            .handle(&Context::background(), &record(&event))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_event_type_fails() {
        let event = DomainEvent::from(OrderCreated::new("order-1", vec![]));

        let err = NotificationHandler::new()
            .handle(&Context::background(), &record(&event))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Decode(_)));
    }
}
