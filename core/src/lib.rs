//! # EDA Core
//!
//! Core types and traits for the event-driven order pipeline.
//!
//! Services in the pipeline talk to each other only through an ordered,
//! durable log. This crate holds everything both sides of that log agree on:
//!
//! - [`envelope`]: the JSON event envelope and its two-level codec
//! - [`event`]: the closed set of domain events and their payloads
//! - [`broker`]: the broker client abstraction (records, delivery reports,
//!   producer and consumer traits)
//! - [`handler`]: the message handler capability and the topic registry
//! - [`context`]: deadline + cancellation carried into publishes and handlers
//!
//! The publish/consume engine itself lives in `eda-runtime`; the rdkafka
//! clients live in `eda-redpanda`.
//!
//! ## Example
//!
//! ```
//! use eda_core::envelope::EventEnvelope;
//! use eda_core::environment::SystemClock;
//! use eda_core::event::{DomainEvent, OrderCreated, OrderLine};
//!
//! # fn main() -> Result<(), eda_core::envelope::CodecError> {
//! let event = DomainEvent::from(OrderCreated::new(
//!     "order-1",
//!     vec![OrderLine::new("p1", 2)],
//! ));
//! let bytes = EventEnvelope::from_event(&event, &SystemClock)?.encode()?;
//!
//! let decoded = EventEnvelope::decode(&bytes)?.into_event()?;
//! assert_eq!(decoded, event);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod context;
pub mod envelope;
pub mod event;
pub mod handler;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use tokio_util::sync::CancellationToken;

/// Environment module - injectable dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Envelope timestamps are taken from a `Clock` so tests can pin them.
    ///
    /// # Examples
    ///
    /// ```
    /// use eda_core::environment::{Clock, SystemClock};
    ///
    /// let now = SystemClock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
