//! # EDA Runtime
//!
//! The publish/consume engine of the event-driven order pipeline.
//!
//! ## Core Components
//!
//! - [`Publisher`]: per-call acknowledged publish on top of a
//!   [`ProducerClient`](eda_core::broker::ProducerClient), a background task
//!   that drains delivery reports, and a bounded flush on close
//! - [`Subscriber`]: the poll/dispatch/commit loop on top of a
//!   [`ConsumerClient`](eda_core::broker::ConsumerClient), committing a record
//!   only after its handler succeeded
//!
//! Both components are generic over the broker traits, so the same engine runs
//! against rdkafka in production and against the in-memory broker of
//! `eda-testing` in tests.
//!
//! Each component receives an explicit [`tracing::Span`] at construction and
//! records every log line inside it; nothing here reaches for a global logger
//! configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod publisher;
pub mod subscriber;

pub use publisher::{PublishError, Publisher, TIMESTAMP_HEADER};
pub use subscriber::{Subscriber, SubscriberConfig, SubscriberError, SubscriberState};
