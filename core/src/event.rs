//! Domain events exchanged between the order, inventory and notification services.
//!
//! The wire carries a string tag (`"order.created"`, ...) next to an untyped
//! JSON payload. At the application boundary that pair is turned into a
//! [`DomainEvent`] exactly once, so consumers `match` on a closed enum instead
//! of comparing strings.
//!
//! # Payload compatibility
//!
//! Required payload fields have no serde defaults: a payload missing one of
//! them is rejected with a decode error rather than filled with a zero value.
//! Fields that are genuinely optional are `Option`s.

use crate::envelope::CodecError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of event type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// An order was accepted by the order service.
    #[serde(rename = "order.created")]
    OrderCreated,
    /// An order was confirmed.
    #[serde(rename = "order.confirmed")]
    OrderConfirmed,
    /// Stock was reserved for an order.
    #[serde(rename = "inventory.reserved")]
    InventoryReserved,
    /// A reservation was released.
    #[serde(rename = "inventory.released")]
    InventoryReleased,
    /// A customer notification went out.
    #[serde(rename = "notification.sent")]
    NotificationSent,
}

impl EventType {
    /// Every known event type, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::OrderCreated,
        Self::OrderConfirmed,
        Self::InventoryReserved,
        Self::InventoryReleased,
        Self::NotificationSent,
    ];

    /// The wire tag for this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderConfirmed => "order.confirmed",
            Self::InventoryReserved => "inventory.reserved",
            Self::InventoryReleased => "inventory.released",
            Self::NotificationSent => "notification.sent",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| CodecError::UnknownEventType(s.to_string()))
    }
}

/// A payload struct bound to exactly one [`EventType`].
///
/// The binding is what lets [`EventEnvelope::decode_payload`](crate::envelope::EventEnvelope::decode_payload)
/// reject an envelope whose tag and payload disagree.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The tag this payload is published under.
    const EVENT_TYPE: EventType;
}

/// One line of an order as carried by [`OrderCreated`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Product being ordered
    pub product_id: String,
    /// Number of units
    pub quantity: u32,
    /// Unit price in cents, when the producer knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price_cents: Option<u64>,
}

impl OrderLine {
    /// Create an order line without price information.
    #[must_use]
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price_cents: None,
        }
    }

    /// Attach a unit price.
    #[must_use]
    pub const fn with_unit_price_cents(mut self, cents: u64) -> Self {
        self.unit_price_cents = Some(cents);
        self
    }
}

/// Payload of `order.created`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// Order identifier, also used as the record key
    pub order_id: String,
    /// Customer who placed the order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Ordered lines
    pub items: Vec<OrderLine>,
    /// Order total in cents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cents: Option<u64>,
}

impl OrderCreated {
    /// Create a minimal `order.created` payload.
    #[must_use]
    pub fn new(order_id: impl Into<String>, items: Vec<OrderLine>) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: None,
            items,
            total_cents: None,
        }
    }
}

impl EventPayload for OrderCreated {
    const EVENT_TYPE: EventType = EventType::OrderCreated;
}

/// Payload of `order.confirmed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    /// Confirmed order
    pub order_id: String,
    /// Customer owning the order
    pub customer_id: String,
    /// Confirmation time
    pub confirmed_at: DateTime<Utc>,
}

impl EventPayload for OrderConfirmed {
    const EVENT_TYPE: EventType = EventType::OrderConfirmed;
}

/// A single product reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reserved product
    pub product_id: String,
    /// Reserved units
    pub quantity: u32,
}

/// Payload of `inventory.reserved`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReserved {
    /// Order the stock was reserved for
    pub order_id: String,
    /// Reserved lines
    pub items: Vec<Reservation>,
    /// Reservation time
    pub reserved_at: DateTime<Utc>,
}

impl EventPayload for InventoryReserved {
    const EVENT_TYPE: EventType = EventType::InventoryReserved;
}

/// Payload of `inventory.released`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReleased {
    /// Order whose reservation was released
    pub order_id: String,
    /// Released lines
    pub items: Vec<Reservation>,
    /// Release time
    pub released_at: DateTime<Utc>,
    /// Why the stock was released
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventPayload for InventoryReleased {
    const EVENT_TYPE: EventType = EventType::InventoryReleased;
}

/// Payload of `notification.sent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSent {
    /// Order the notification refers to
    pub order_id: String,
    /// Kind of notification (e.g. `order_confirmed`)
    pub notification_type: String,
    /// Human readable message
    pub message: String,
    /// Send time
    pub sent_at: DateTime<Utc>,
}

impl EventPayload for NotificationSent {
    const EVENT_TYPE: EventType = EventType::NotificationSent;
}

/// Every event the pipeline knows about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    /// `order.created`
    OrderCreated(OrderCreated),
    /// `order.confirmed`
    OrderConfirmed(OrderConfirmed),
    /// `inventory.reserved`
    InventoryReserved(InventoryReserved),
    /// `inventory.released`
    InventoryReleased(InventoryReleased),
    /// `notification.sent`
    NotificationSent(NotificationSent),
}

impl DomainEvent {
    /// Tag of the wrapped payload.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::OrderCreated(_) => EventType::OrderCreated,
            Self::OrderConfirmed(_) => EventType::OrderConfirmed,
            Self::InventoryReserved(_) => EventType::InventoryReserved,
            Self::InventoryReleased(_) => EventType::InventoryReleased,
            Self::NotificationSent(_) => EventType::NotificationSent,
        }
    }

    /// Convert the payload into the generic JSON form stored in the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the payload cannot be serialized.
    pub fn to_payload(&self) -> Result<serde_json::Value, CodecError> {
        let value = match self {
            Self::OrderCreated(p) => serde_json::to_value(p),
            Self::OrderConfirmed(p) => serde_json::to_value(p),
            Self::InventoryReserved(p) => serde_json::to_value(p),
            Self::InventoryReleased(p) => serde_json::to_value(p),
            Self::NotificationSent(p) => serde_json::to_value(p),
        };
        value.map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a generic payload according to its tag.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPayload`] if the payload does not have the
    /// shape `event_type` declares.
    pub fn from_payload(
        event_type: EventType,
        payload: &serde_json::Value,
    ) -> Result<Self, CodecError> {
        Ok(match event_type {
            EventType::OrderCreated => Self::OrderCreated(typed(payload)?),
            EventType::OrderConfirmed => Self::OrderConfirmed(typed(payload)?),
            EventType::InventoryReserved => Self::InventoryReserved(typed(payload)?),
            EventType::InventoryReleased => Self::InventoryReleased(typed(payload)?),
            EventType::NotificationSent => Self::NotificationSent(typed(payload)?),
        })
    }
}

/// Type-directed second-stage decode shared by the envelope and [`DomainEvent`].
pub(crate) fn typed<P: EventPayload>(payload: &serde_json::Value) -> Result<P, CodecError> {
    P::deserialize(payload).map_err(|e| CodecError::InvalidPayload {
        event_type: P::EVENT_TYPE,
        reason: e.to_string(),
    })
}

impl From<OrderCreated> for DomainEvent {
    fn from(payload: OrderCreated) -> Self {
        Self::OrderCreated(payload)
    }
}

impl From<OrderConfirmed> for DomainEvent {
    fn from(payload: OrderConfirmed) -> Self {
        Self::OrderConfirmed(payload)
    }
}

impl From<InventoryReserved> for DomainEvent {
    fn from(payload: InventoryReserved) -> Self {
        Self::InventoryReserved(payload)
    }
}

impl From<InventoryReleased> for DomainEvent {
    fn from(payload: InventoryReleased) -> Self {
        Self::InventoryReleased(payload)
    }
}

impl From<NotificationSent> for DomainEvent {
    fn from(payload: NotificationSent) -> Self {
        Self::NotificationSent(payload)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_type_tags_round_trip_through_from_str() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), event_type);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = "order.shipped".parse::<EventType>().unwrap_err();
        assert!(matches!(err, CodecError::UnknownEventType(tag) if tag == "order.shipped"));
    }

    #[test]
    fn serde_tag_matches_as_str() {
        for event_type in EventType::ALL {
            let json = serde_json::to_string(&event_type).unwrap();
            assert_eq!(json, format!("\"{}\"", event_type.as_str()));
        }
    }

    #[test]
    fn missing_required_field_is_not_defaulted() {
        let payload = serde_json::json!({ "order_id": "order-1" });
        let err = DomainEvent::from_payload(EventType::OrderCreated, &payload).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidPayload { event_type: EventType::OrderCreated, .. }
        ));
    }

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let payload = DomainEvent::from(OrderCreated::new("order-1", vec![OrderLine::new("p1", 2)]))
            .to_payload()
            .unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "order_id": "order-1",
                "items": [{ "product_id": "p1", "quantity": 2 }]
            })
        );
    }
}
