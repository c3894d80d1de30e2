//! Event envelope and its two-level codec.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "id": "20250101120000-k3Jd9XqP2mZt8RwA",
//!   "type": "order.created",
//!   "timestamp": "2025-01-01T12:00:00Z",
//!   "data": { "order_id": "order-1", "items": [] }
//! }
//! ```
//!
//! # Two-level decode
//!
//! [`EventEnvelope::decode`] only checks the outer shape: `data` is kept as an
//! untyped [`serde_json::Value`], so an envelope never fails to decode because
//! of an unfamiliar payload. The type-directed step
//! ([`EventEnvelope::decode_payload`] or [`EventEnvelope::into_event`]) is the
//! only place a payload shape is checked, and it refuses payloads whose tag
//! does not match.
//!
//! Decode failures are terminal for the message that produced them. Nothing
//! here returns a partially populated envelope.

use crate::environment::Clock;
use crate::event::{DomainEvent, EventPayload, EventType, typed};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Length of the random part of an [`EventId`].
const ID_SUFFIX_LEN: usize = 16;

/// Errors produced while encoding or decoding envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload could not be turned into JSON.
    #[error("Failed to encode event: {0}")]
    Encode(String),

    /// The bytes are not a well-formed envelope.
    #[error("Malformed event envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope carries a type tag outside the closed set.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// A payload was requested for a different type than the envelope declares.
    #[error("Event type mismatch: expected {expected}, envelope declares {actual}")]
    TypeMismatch {
        /// Type the caller asked for
        expected: EventType,
        /// Type the envelope declares
        actual: EventType,
    },

    /// The payload does not have the shape its type declares.
    #[error("Invalid payload for {event_type}: {reason}")]
    InvalidPayload {
        /// Declared type
        event_type: EventType,
        /// Underlying deserialization failure
        reason: String,
    },
}

/// Unique event identifier.
///
/// A second-resolution UTC prefix (`YYYYmmddHHMMSS`) keeps ids roughly
/// time-ordered; the suffix is drawn from the thread-local CSPRNG on every
/// call, so ids minted within the same second still differ.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh id stamped with the current time.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    /// Generate a fresh id stamped with `at`.
    #[must_use]
    pub fn generate_at(at: DateTime<Utc>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(char::from)
            .collect();
        Self(format!("{}-{suffix}", at.format("%Y%m%d%H%M%S")))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outer wrapper around a domain event payload.
///
/// Fields are read-only once constructed: the id and timestamp are assigned at
/// creation and never change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventEnvelope {
    id: EventId,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: DateTime<Utc>,
    data: serde_json::Value,
}

/// Shape used for the outer decode; the type tag stays a plain string so an
/// unknown tag gets its own error instead of a generic serde message.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: DateTime<Utc>,
    data: serde_json::Value,
}

impl EventEnvelope {
    /// Wrap an already-generic payload.
    #[must_use]
    pub fn new(event_type: EventType, data: serde_json::Value, clock: &dyn Clock) -> Self {
        let timestamp = clock.now();
        Self {
            id: EventId::generate_at(timestamp),
            event_type,
            timestamp,
            data,
        }
    }

    /// Wrap a typed payload under its own tag.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the payload cannot be serialized.
    pub fn from_payload<P: EventPayload>(payload: &P, clock: &dyn Clock) -> Result<Self, CodecError> {
        let data = serde_json::to_value(payload).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Self::new(P::EVENT_TYPE, data, clock))
    }

    /// Wrap a [`DomainEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the payload cannot be serialized.
    pub fn from_event(event: &DomainEvent, clock: &dyn Clock) -> Result<Self, CodecError> {
        Ok(Self::new(event.event_type(), event.to_payload()?, clock))
    }

    /// Event id.
    #[must_use]
    pub const fn id(&self) -> &EventId {
        &self.id
    }

    /// Declared event type.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Untyped payload.
    #[must_use]
    pub const fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Serialize the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Outer decode: parse the envelope, leaving the payload untyped.
    ///
    /// # Errors
    ///
    /// - [`CodecError::MalformedEnvelope`] if the bytes are not a complete
    ///   envelope (truncated, not JSON, missing or extra fields)
    /// - [`CodecError::UnknownEventType`] if the tag is not a known type
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::MalformedEnvelope(e.to_string()))?;
        Ok(Self {
            id: wire.id,
            event_type: wire.event_type.parse()?,
            timestamp: wire.timestamp,
            data: wire.data,
        })
    }

    /// Inner decode into one specific payload type.
    ///
    /// # Errors
    ///
    /// - [`CodecError::TypeMismatch`] if `P` belongs to a different tag
    /// - [`CodecError::InvalidPayload`] if the payload does not fit `P`
    pub fn decode_payload<P: EventPayload>(&self) -> Result<P, CodecError> {
        if P::EVENT_TYPE != self.event_type {
            return Err(CodecError::TypeMismatch {
                expected: P::EVENT_TYPE,
                actual: self.event_type,
            });
        }
        typed(&self.data)
    }

    /// Inner decode into the closed [`DomainEvent`] union.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPayload`] if the payload does not fit the
    /// declared type.
    pub fn into_event(self) -> Result<DomainEvent, CodecError> {
        DomainEvent::from_payload(self.event_type, &self.data)
    }
}

/// Encode `payload` under `event_type` with a fresh id and timestamp.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the payload cannot be serialized.
pub fn encode<P: Serialize>(
    event_type: EventType,
    payload: &P,
    clock: &dyn Clock,
) -> Result<Vec<u8>, CodecError> {
    let data = serde_json::to_value(payload).map_err(|e| CodecError::Encode(e.to_string()))?;
    EventEnvelope::new(event_type, data, clock).encode()
}

/// Outer decode, see [`EventEnvelope::decode`].
///
/// # Errors
///
/// Same as [`EventEnvelope::decode`].
pub fn decode(bytes: &[u8]) -> Result<EventEnvelope, CodecError> {
    EventEnvelope::decode(bytes)
}
