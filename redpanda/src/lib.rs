//! Redpanda / Kafka broker clients for the EDA pipeline.
//!
//! This crate implements the `eda-core` broker traits on top of rdkafka:
//!
//! - [`KafkaProducer`]: a threaded producer whose delivery callbacks are
//!   forwarded, tagged, onto a delivery report channel
//! - [`KafkaConsumer`]: a stream consumer with manual commits
//! - [`KafkaConfig`]: the producer and consumer configuration surface
//!
//! # Delivery semantics
//!
//! The producer is configured as an idempotent producer: every replica
//! acknowledges (`acks=all`), at most five requests are in flight and the
//! broker deduplicates retries by sequence number. Consumers never
//! auto-commit; the subscriber commits each record after its handler
//! succeeded, which gives at-least-once processing.
//!
//! # Example
//!
//! ```no_run
//! use eda_redpanda::{KafkaConfig, KafkaConsumer, KafkaProducer};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KafkaConfig::builder()
//!     .brokers("localhost:9092")
//!     .client_id("order-service")
//!     .build()?;
//!
//! let (producer, reports) = KafkaProducer::new(&config)?;
//! let consumer = KafkaConsumer::new(&config, "inventory-service-group")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod consumer;
mod producer;

pub use config::{KafkaConfig, KafkaConfigBuilder, SaslCredentials};
pub use consumer::KafkaConsumer;
pub use producer::{KafkaProducer, ReportingContext};
