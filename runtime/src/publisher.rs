//! Acknowledged publishing.
//!
//! [`Publisher::publish`] gives every call its own acknowledgment channel and
//! suspends the caller until exactly one of these happens:
//!
//! 1. the broker confirms the record was persisted
//! 2. the broker reports a delivery error
//! 3. the caller's [`Context`] deadline passes or its token is cancelled
//!
//! Retries and deduplication belong to the broker client (idempotent
//! producer); this component never resends.
//!
//! A background task drains the producer's delivery report channel and routes
//! each report to the waiting caller. Reports nobody waits for any more (the
//! caller gave up) and client-level errors are only logged.

use eda_core::broker::{
    BrokerError, DeliveryAck, DeliveryReport, DeliveryReports, DeliveryTag, OutboundRecord,
    ProducerClient,
};
use eda_core::context::{Context, ContextError};
use eda_core::envelope::{CodecError, EventEnvelope};
use eda_core::environment::{Clock, SystemClock};
use eda_core::event::DomainEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

/// Header carrying the publish time (RFC3339) on every outbound record.
pub const TIMESTAMP_HEADER: &str = "timestamp";

/// Default bound on the shutdown flush.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors returned by [`Publisher`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The producer refused the record before sending it.
    #[error("Failed to enqueue record: {0}")]
    Enqueue(#[source] BrokerError),

    /// The broker reported that the record was not persisted.
    #[error("Delivery failed: {0}")]
    Delivery(#[source] BrokerError),

    /// The caller's deadline passed before an acknowledgment arrived.
    #[error("Timed out waiting for acknowledgment from topic '{topic}'")]
    Timeout {
        /// Target topic
        topic: String,
    },

    /// The caller's context was cancelled before an acknowledgment arrived.
    #[error("Publish to topic '{topic}' cancelled")]
    Cancelled {
        /// Target topic
        topic: String,
    },

    /// The publisher was closed.
    #[error("Publisher is closed")]
    Closed,

    /// The event could not be encoded.
    #[error("Failed to encode event: {0}")]
    Encode(#[from] CodecError),
}

impl PublishError {
    /// The caller gave up waiting; the record may still be persisted.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The caller's context was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The broker or the client rejected the record.
    #[must_use]
    pub const fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Enqueue(_) | Self::Delivery(_))
    }

    fn from_context(error: ContextError, topic: &str) -> Self {
        let topic = topic.to_string();
        match error {
            ContextError::Cancelled => Self::Cancelled { topic },
            ContextError::DeadlineExceeded => Self::Timeout { topic },
        }
    }
}

type AckSender = oneshot::Sender<Result<DeliveryAck, BrokerError>>;
type Waiters = Mutex<HashMap<DeliveryTag, AckSender>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes records and waits for their acknowledgment.
///
/// Must be created inside a Tokio runtime: construction spawns the delivery
/// report drain task.
///
/// # Example
///
/// ```ignore
/// let (producer, reports) = KafkaProducer::new(&kafka_config)?;
/// let publisher = Publisher::new(producer, reports, tracing::info_span!("publisher"));
///
/// let ctx = Context::background().with_timeout(Duration::from_secs(5));
/// let ack = publisher.publish_event(&ctx, "order.created", "order-1", &event).await?;
///
/// publisher.close().await;
/// ```
pub struct Publisher<P: ProducerClient> {
    client: Arc<P>,
    waiters: Arc<Waiters>,
    next_tag: AtomicU64,
    closed: AtomicBool,
    flush_timeout: Duration,
    clock: Arc<dyn Clock>,
    drain: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
    span: Span,
}

impl<P: ProducerClient> Publisher<P> {
    /// Wrap `client` and start draining `reports`.
    ///
    /// `reports` must be the delivery report channel of `client`.
    pub fn new(client: P, reports: DeliveryReports, span: Span) -> Self {
        let waiters: Arc<Waiters> = Arc::default();
        let stop = CancellationToken::new();
        let drain = tokio::spawn(
            drain_reports(reports, Arc::clone(&waiters), stop.clone()).instrument(span.clone()),
        );

        Self {
            client: Arc::new(client),
            waiters,
            next_tag: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            clock: Arc::new(SystemClock),
            drain: Mutex::new(Some(drain)),
            stop,
            span,
        }
    }

    /// Bound the flush performed by [`close`](Self::close).
    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Clock used for envelope and header timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The wrapped producer.
    #[must_use]
    pub fn client(&self) -> &P {
        &self.client
    }

    /// Calls currently waiting for an acknowledgment.
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        lock(&self.waiters).len()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send `value` to `topic` and wait for the broker's verdict.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Enqueue`] / [`PublishError::Delivery`] when the
    ///   client or the broker rejects the record
    /// - [`PublishError::Timeout`] / [`PublishError::Cancelled`] when `ctx`
    ///   ends first; the record may still be persisted later
    /// - [`PublishError::Closed`] after [`close`](Self::close)
    pub async fn publish(
        &self,
        ctx: &Context,
        topic: &str,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<DeliveryAck, PublishError> {
        self.publish_inner(ctx, topic, key, value)
            .instrument(self.span.clone())
            .await
    }

    /// Wrap `event` in a fresh envelope and publish it.
    ///
    /// # Errors
    ///
    /// [`PublishError::Encode`] if the event cannot be encoded, otherwise as
    /// [`publish`](Self::publish).
    pub async fn publish_event(
        &self,
        ctx: &Context,
        topic: &str,
        key: &str,
        event: &DomainEvent,
    ) -> Result<DeliveryAck, PublishError> {
        let envelope = EventEnvelope::from_event(event, self.clock.as_ref())?;
        let value = envelope.encode()?;
        tracing::debug!(
            parent: &self.span,
            event_id = %envelope.id(),
            event_type = %envelope.event_type(),
            topic = %topic,
            "Publishing event"
        );
        self.publish(ctx, topic, key.as_bytes(), value).await
    }

    async fn publish_inner(
        &self,
        ctx: &Context,
        topic: &str,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<DeliveryAck, PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }
        if let Some(error) = ctx.err() {
            return Err(PublishError::from_context(error, topic));
        }

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let (ack_tx, ack_rx) = oneshot::channel();
        // Registered before the send so an early report cannot miss its waiter.
        lock(&self.waiters).insert(tag, ack_tx);

        let record = OutboundRecord::new(topic, key, value)
            .header(TIMESTAMP_HEADER, self.clock.now().to_rfc3339());

        if let Err(error) = self.client.send(record, tag) {
            lock(&self.waiters).remove(&tag);
            tracing::error!(topic = %topic, error = %error, "Failed to enqueue record");
            return Err(PublishError::Enqueue(error));
        }

        tokio::select! {
            biased;
            outcome = ack_rx => match outcome {
                Ok(Ok(ack)) => {
                    tracing::debug!(
                        topic = %ack.topic,
                        partition = ack.partition,
                        offset = ack.offset,
                        "Record acknowledged"
                    );
                    Ok(ack)
                },
                Ok(Err(error)) => {
                    tracing::error!(topic = %topic, error = %error, "Delivery failed");
                    Err(PublishError::Delivery(error))
                },
                // The drain task dropped the waiter during close.
                Err(_) => Err(PublishError::Closed),
            },
            reason = ctx.done() => {
                lock(&self.waiters).remove(&tag);
                tracing::warn!(
                    topic = %topic,
                    key = %String::from_utf8_lossy(key),
                    reason = %reason,
                    "Gave up waiting for acknowledgment"
                );
                Err(PublishError::from_context(reason, topic))
            },
        }
    }

    /// Flush in-flight records and stop the report drain.
    ///
    /// The flush is bounded by the configured timeout; records still in
    /// flight afterwards are logged as lost and the publisher closes anyway.
    /// Later calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_inner().instrument(self.span.clone()).await;
    }

    async fn close_inner(&self) {
        let timeout = self.flush_timeout;
        tracing::info!(
            flush_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            in_flight = self.client.in_flight_count(),
            "Flushing publisher"
        );

        let client = Arc::clone(&self.client);
        match tokio::task::spawn_blocking(move || client.flush(timeout)).await {
            Ok(Ok(())) => tracing::info!("Publisher flushed"),
            Ok(Err(error)) => tracing::warn!(
                outstanding = self.client.in_flight_count(),
                error = %error,
                "Messages lost on shutdown"
            ),
            Err(error) => tracing::error!(error = %error, "Flush task failed"),
        }

        self.stop.cancel();
        let drain = lock(&self.drain).take();
        if let Some(drain) = drain {
            if let Err(error) = drain.await {
                tracing::error!(error = %error, "Delivery report drain task failed");
            }
        }

        let abandoned = std::mem::take(&mut *lock(&self.waiters));
        if !abandoned.is_empty() {
            tracing::warn!(
                count = abandoned.len(),
                "Closing with callers still waiting for acknowledgment"
            );
        }
        tracing::info!("Publisher closed");
    }
}

impl<P: ProducerClient> Drop for Publisher<P> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn drain_reports(mut reports: DeliveryReports, waiters: Arc<Waiters>, stop: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            report = reports.recv() => match report {
                Some(report) => route_report(&waiters, report),
                None => {
                    tracing::debug!("Delivery report channel closed");
                    return;
                },
            },
            () = stop.cancelled() => {
                while let Ok(report) = reports.try_recv() {
                    route_report(&waiters, report);
                }
                tracing::debug!("Delivery report drain stopped");
                return;
            },
        }
    }
}

fn route_report(waiters: &Waiters, report: DeliveryReport) {
    match report {
        DeliveryReport::Delivery { tag, result } => {
            let waiter = lock(waiters).remove(&tag);
            let unclaimed = match waiter {
                Some(waiter) => waiter.send(result).err(),
                None => Some(result),
            };
            if let Some(result) = unclaimed {
                log_unclaimed(tag, &result);
            }
        },
        DeliveryReport::ClientError(error) => {
            tracing::error!(error = %error, "Broker client error");
        },
    }
}

fn log_unclaimed(tag: DeliveryTag, result: &Result<DeliveryAck, BrokerError>) {
    match result {
        Ok(ack) => tracing::info!(
            tag,
            topic = %ack.topic,
            partition = ack.partition,
            offset = ack.offset,
            "Delivered record after its caller stopped waiting"
        ),
        Err(error) => tracing::error!(
            tag,
            error = %error,
            "Delivery failed after its caller stopped waiting"
        ),
    }
}
