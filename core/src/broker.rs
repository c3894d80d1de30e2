//! Broker client abstraction.
//!
//! The publish/consume engine never talks to Kafka directly. It drives a
//! [`ProducerClient`] and a [`ConsumerClient`], which model exactly what the
//! engine needs from a partitioned log:
//!
//! - producers accept a record plus a [`DeliveryTag`] and later emit a
//!   [`DeliveryReport`] carrying the same tag on a report channel
//! - consumers poll one record at a time with a bounded wait and commit the
//!   position after a record
//!
//! `eda-redpanda` implements both on top of rdkafka; `eda-testing` provides an
//! in-memory log with the same semantics for tests.
//!
//! # Offsets
//!
//! Committing a record stores `offset + 1`: the committed value is the next
//! position the consumer group will read after a restart.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Correlates a send with its delivery report.
pub type DeliveryTag = u64;

/// Receiving end of a producer's delivery report channel.
pub type DeliveryReports = mpsc::UnboundedReceiver<DeliveryReport>;

/// Sending end of a producer's delivery report channel.
pub type DeliveryReportSender = mpsc::UnboundedSender<DeliveryReport>;

/// Create a delivery report channel for a producer implementation.
#[must_use]
pub fn delivery_channel() -> (DeliveryReportSender, DeliveryReports) {
    mpsc::unbounded_channel()
}

/// Errors reported by broker clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The client could not be constructed from its configuration.
    #[error("Failed to create broker client: {0}")]
    ClientCreation(String),

    /// The client refused to accept a record (queue full, unknown topic, ...).
    #[error("Failed to enqueue record for topic '{topic}': {reason}")]
    Enqueue {
        /// Target topic
        topic: String,
        /// Reason reported by the client
        reason: String,
    },

    /// The broker reported that a record could not be persisted.
    #[error("Delivery failed for topic '{topic}': {reason}")]
    Delivery {
        /// Target topic
        topic: String,
        /// Reason reported by the broker
        reason: String,
    },

    /// The subscription was rejected.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    Subscription {
        /// Requested topics
        topics: Vec<String>,
        /// Reason reported by the client
        reason: String,
    },

    /// A position could not be committed.
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    Commit {
        /// Topic of the record
        topic: String,
        /// Partition of the record
        partition: i32,
        /// Offset of the record
        offset: i64,
        /// Reason reported by the client
        reason: String,
    },

    /// A flush ended with records still in flight.
    #[error("Flush incomplete, {outstanding} record(s) still in flight: {reason}")]
    FlushIncomplete {
        /// Records not yet acknowledged
        outstanding: usize,
        /// Reason reported by the client
        reason: String,
    },

    /// Client-level failure not tied to a single record.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors returned by [`ConsumerClient::poll`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The client gave up waiting; this is not a failure.
    #[error("Poll timed out")]
    TimedOut,

    /// Transient client or broker failure.
    #[error("Poll failed: {0}")]
    Transport(String),
}

/// A record as delivered by the broker.
///
/// Records are read-only for everything downstream of the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    value: Vec<u8>,
    headers: Vec<(String, Vec<u8>)>,
    timestamp_ms: Option<i64>,
}

impl MessageRecord {
    /// Create a record at the given log coordinates.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
            headers: Vec::new(),
            timestamp_ms: None,
        }
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, Vec<u8>)>) -> Self {
        self.headers = headers;
        self
    }

    /// Attach the broker timestamp (milliseconds since the epoch).
    #[must_use]
    pub const fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Topic the record was read from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition the record was read from.
    #[must_use]
    pub const fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset of the record within its partition.
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Partitioning key.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Key rendered for logs; non UTF-8 bytes are replaced.
    #[must_use]
    pub fn key_lossy(&self) -> String {
        self.key
            .as_deref()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default()
    }

    /// Raw value, expected to hold an encoded envelope.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// All headers in broker order.
    #[must_use]
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }

    /// First header with the given name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_slice())
    }

    /// Broker timestamp in milliseconds since the epoch.
    #[must_use]
    pub const fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }
}

/// A record handed to a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Target topic
    pub topic: String,
    /// Partitioning key
    pub key: Vec<u8>,
    /// Encoded envelope
    pub value: Vec<u8>,
    /// Headers sent along with the record
    pub headers: Vec<(String, Vec<u8>)>,
}

impl OutboundRecord {
    /// Create a record without headers.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value,
            headers: Vec::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Broker confirmation that a record was persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryAck {
    /// Topic written to
    pub topic: String,
    /// Partition written to
    pub partition: i32,
    /// Offset assigned by the broker
    pub offset: i64,
}

/// Asynchronous notification emitted by a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Outcome of one send, identified by the tag passed to [`ProducerClient::send`].
    Delivery {
        /// Tag of the send
        tag: DeliveryTag,
        /// Ack or delivery error
        result: Result<DeliveryAck, BrokerError>,
    },

    /// Client-level error not tied to a send (broker down, auth failure, ...).
    ClientError(BrokerError),
}

/// Producer side of the broker abstraction.
///
/// Implementations own their network handle and are expected to be
/// idempotent at the transport level (retries, deduplication); callers add no
/// retry logic of their own.
pub trait ProducerClient: Send + Sync + 'static {
    /// Enqueue a record. The outcome arrives later as a
    /// [`DeliveryReport::Delivery`] carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Enqueue`] if the record was not accepted; no
    /// report will follow in that case.
    fn send(&self, record: OutboundRecord, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Block until every enqueued record has been reported or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::FlushIncomplete`] if records were still in
    /// flight when the timeout elapsed.
    fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;

    /// Records enqueued but not yet reported.
    fn in_flight_count(&self) -> usize;
}

/// Future returned by [`ConsumerClient::poll`].
pub type PollFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<MessageRecord>, PollError>> + Send + 'a>>;

/// Consumer side of the broker abstraction.
///
/// A consumer belongs to one consumer group; committed positions are shared
/// by every consumer of that group.
pub trait ConsumerClient: Send + 'static {
    /// Register the topic subscription.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Subscription`] if the client rejects the topics.
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), BrokerError>;

    /// Wait at most `timeout` for the next record.
    ///
    /// `Ok(None)` means nothing arrived in time.
    fn poll(&mut self, timeout: Duration) -> PollFuture<'_>;

    /// Commit the position just after `record`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Commit`] if the position could not be stored.
    fn commit(&mut self, record: &MessageRecord) -> Result<(), BrokerError>;
}
