//! In-memory partitioned log.
//!
//! [`InMemoryBroker`] keeps one append-only vector per topic partition and one
//! committed position per `(group, topic, partition)`. Producers and consumers
//! created from the same broker share that state, so a test can publish,
//! consume, drop the consumer and create a new one in the same group to
//! simulate a restart.
//!
//! Failure injection:
//! - [`InMemoryProducer::with_ack_latency`] delays delivery reports
//! - [`InMemoryProducer::failing_deliveries`] reports every send as failed
//! - [`InMemoryProducer::rejecting_sends`] refuses records at enqueue time
//! - [`InMemoryProducer::holding_deliveries`] never reports (flush times out)
//! - [`InMemoryBroker::inject_poll_error`] makes the next poll fail

use eda_core::broker::{
    BrokerError, ConsumerClient, DeliveryAck, DeliveryReport, DeliveryReportSender,
    DeliveryReports, DeliveryTag, MessageRecord, OutboundRecord, PollError, PollFuture,
    ProducerClient, delivery_channel,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

type PartitionKey = (String, i32);
type CommitKey = (String, String, i32);

#[derive(Default)]
struct BrokerState {
    default_partitions: i32,
    partitions: HashMap<String, i32>,
    logs: HashMap<PartitionKey, Vec<MessageRecord>>,
    committed: HashMap<CommitKey, i64>,
    poll_errors: VecDeque<PollError>,
}

impl BrokerState {
    fn partition_count(&self, topic: &str) -> i32 {
        self.partitions
            .get(topic)
            .copied()
            .unwrap_or(self.default_partitions)
            .max(1)
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    appended: Notify,
}

/// Shared in-memory log.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Broker with one partition per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the partition count for `topic`.
    #[must_use]
    pub fn with_partitions(self, topic: impl Into<String>, partitions: i32) -> Self {
        self.lock().partitions.insert(topic.into(), partitions);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record directly, bypassing any producer.
    ///
    /// Keyed records are spread over partitions by key hash; unkeyed records
    /// go to partition 0. Returns the assigned `(partition, offset)`.
    pub fn append(&self, topic: &str, key: Option<&[u8]>, value: Vec<u8>) -> (i32, i64) {
        self.append_with_headers(topic, key, value, Vec::new())
    }

    fn append_with_headers(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        value: Vec<u8>,
        headers: Vec<(String, Vec<u8>)>,
    ) -> (i32, i64) {
        let (partition, offset) = {
            let mut state = self.lock();
            let partition = key.map_or(0, |key| partition_for(key, state.partition_count(topic)));
            let log = state.logs.entry((topic.to_string(), partition)).or_default();
            let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
            log.push(
                MessageRecord::new(topic, partition, offset, key.map(<[u8]>::to_vec), value)
                    .with_headers(headers)
                    .with_timestamp_ms(chrono::Utc::now().timestamp_millis()),
            );
            (partition, offset)
        };
        self.shared.appended.notify_waiters();
        (partition, offset)
    }

    /// Every record of `topic`, ordered by partition then offset.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<MessageRecord> {
        let state = self.lock();
        let mut records: Vec<MessageRecord> = state
            .logs
            .iter()
            .filter(|((log_topic, _), _)| log_topic == topic)
            .flat_map(|(_, log)| log.iter().cloned())
            .collect();
        records.sort_by_key(|record| (record.partition(), record.offset()));
        records
    }

    /// Committed position of `group` on one partition: the offset the group
    /// reads next, `None` if it never committed there.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Make the next poll of any consumer return `error`.
    pub fn inject_poll_error(&self, error: PollError) {
        self.lock().poll_errors.push_back(error);
        self.shared.appended.notify_waiters();
    }

    /// Create a producer writing to this broker and its report channel.
    #[must_use]
    pub fn producer(&self) -> (InMemoryProducer, DeliveryReports) {
        let (reports_tx, reports_rx) = delivery_channel();
        let producer = InMemoryProducer {
            broker: self.clone(),
            reports: reports_tx,
            behavior: ProducerBehavior::default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        (producer, reports_rx)
    }

    /// Create a consumer in `group`.
    #[must_use]
    pub fn consumer(&self, group: impl Into<String>) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            group: group.into(),
            topics: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

fn partition_for(key: &[u8], partitions: i32) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let buckets = u64::try_from(partitions).unwrap_or(1);
    i32::try_from(hasher.finish() % buckets).unwrap_or(0)
}

#[derive(Clone, Default)]
struct ProducerBehavior {
    ack_latency: Option<Duration>,
    delivery_failure: Option<String>,
    send_rejection: Option<String>,
    hold: bool,
}

/// Producer client over an [`InMemoryBroker`].
///
/// Without latency, a send is appended and reported before `send` returns.
pub struct InMemoryProducer {
    broker: InMemoryBroker,
    reports: DeliveryReportSender,
    behavior: ProducerBehavior,
    in_flight: Arc<AtomicUsize>,
}

impl InMemoryProducer {
    /// Report each delivery after `latency`. Requires a Tokio runtime.
    #[must_use]
    pub const fn with_ack_latency(mut self, latency: Duration) -> Self {
        self.behavior.ack_latency = Some(latency);
        self
    }

    /// Report every send as a delivery failure; nothing is appended.
    #[must_use]
    pub fn failing_deliveries(mut self, reason: impl Into<String>) -> Self {
        self.behavior.delivery_failure = Some(reason.into());
        self
    }

    /// Refuse every send at enqueue time.
    #[must_use]
    pub fn rejecting_sends(mut self, reason: impl Into<String>) -> Self {
        self.behavior.send_rejection = Some(reason.into());
        self
    }

    /// Accept sends but never deliver or report them.
    #[must_use]
    pub const fn holding_deliveries(mut self) -> Self {
        self.behavior.hold = true;
        self
    }

    fn deliver(
        broker: &InMemoryBroker,
        reports: &DeliveryReportSender,
        in_flight: &AtomicUsize,
        failure: Option<&str>,
        record: OutboundRecord,
        tag: DeliveryTag,
    ) {
        let result = match failure {
            Some(reason) => Err(BrokerError::Delivery {
                topic: record.topic,
                reason: reason.to_string(),
            }),
            None => {
                let (partition, offset) = broker.append_with_headers(
                    &record.topic,
                    Some(&record.key),
                    record.value,
                    record.headers,
                );
                Ok(DeliveryAck {
                    topic: record.topic,
                    partition,
                    offset,
                })
            },
        };
        // Reported before the in-flight count drops so a finished flush
        // implies every report is already queued.
        if reports
            .send(DeliveryReport::Delivery { tag, result })
            .is_err()
        {
            tracing::debug!(tag, "Delivery report receiver dropped");
        }
        in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ProducerClient for InMemoryProducer {
    fn send(&self, record: OutboundRecord, tag: DeliveryTag) -> Result<(), BrokerError> {
        if let Some(reason) = &self.behavior.send_rejection {
            return Err(BrokerError::Enqueue {
                topic: record.topic,
                reason: reason.clone(),
            });
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.behavior.hold {
            return Ok(());
        }

        match self.behavior.ack_latency {
            Some(latency) => {
                let broker = self.broker.clone();
                let reports = self.reports.clone();
                let in_flight = Arc::clone(&self.in_flight);
                let failure = self.behavior.delivery_failure.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    Self::deliver(&broker, &reports, &in_flight, failure.as_deref(), record, tag);
                });
            },
            None => Self::deliver(
                &self.broker,
                &self.reports,
                &self.in_flight,
                self.behavior.delivery_failure.as_deref(),
                record,
                tag,
            ),
        }
        Ok(())
    }

    fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let outstanding = self.in_flight.load(Ordering::Acquire);
            if outstanding == 0 {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(BrokerError::FlushIncomplete {
                    outstanding,
                    reason: "flush timed out".to_string(),
                });
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Consumer client over an [`InMemoryBroker`].
///
/// Starts each partition at the group's committed position (or the beginning)
/// and advances its own fetch position independently of commits.
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group: String,
    topics: Vec<String>,
    positions: HashMap<PartitionKey, i64>,
}

impl InMemoryConsumer {
    /// Consumer group of this consumer.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    fn try_next(&mut self) -> Option<Result<Option<MessageRecord>, PollError>> {
        let mut state = self.broker.lock();
        if let Some(error) = state.poll_errors.pop_front() {
            return Some(Err(error));
        }

        for topic in &self.topics {
            for partition in 0..state.partition_count(topic) {
                let key = (topic.clone(), partition);
                let position = self.positions.get(&key).copied().unwrap_or_else(|| {
                    state
                        .committed
                        .get(&(self.group.clone(), topic.clone(), partition))
                        .copied()
                        .unwrap_or(0)
                });
                let next = usize::try_from(position)
                    .ok()
                    .and_then(|index| state.logs.get(&key).and_then(|log| log.get(index)))
                    .cloned();
                if let Some(record) = next {
                    self.positions.insert(key, position + 1);
                    return Some(Ok(Some(record)));
                }
            }
        }
        None
    }
}

impl ConsumerClient for InMemoryConsumer {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), BrokerError> {
        if topics.iter().any(|topic| topic.is_empty()) {
            return Err(BrokerError::Subscription {
                topics: topics.iter().map(|topic| (*topic).to_string()).collect(),
                reason: "topic names must not be empty".to_string(),
            });
        }
        self.topics = topics.iter().map(|topic| (*topic).to_string()).collect();
        self.topics.sort();
        self.topics.dedup();
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> PollFuture<'_> {
        Box::pin(async move {
            let shared = Arc::clone(&self.broker.shared);
            let deadline = Instant::now() + timeout;
            loop {
                let notified = shared.appended.notified();
                tokio::pin!(notified);
                // Registered before checking so an append in between is not missed.
                notified.as_mut().enable();

                if let Some(outcome) = self.try_next() {
                    return outcome;
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }

    fn commit(&mut self, record: &MessageRecord) -> Result<(), BrokerError> {
        self.broker.lock().committed.insert(
            (
                self.group.clone(),
                record.topic().to_string(),
                record.partition(),
            ),
            record.offset() + 1,
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumer_reads_appended_records_in_order() {
        let broker = InMemoryBroker::new();
        broker.append("orders", Some(b"a"), b"1".to_vec());
        broker.append("orders", Some(b"b"), b"2".to_vec());

        let mut consumer = broker.consumer("group");
        consumer.subscribe(&["orders"]).unwrap();

        let first = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!((first.offset(), first.value()), (0, &b"1"[..]));
        assert_eq!((second.offset(), second.value()), (1, &b"2"[..]));
        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_consumer_resumes_at_committed_position() {
        let broker = InMemoryBroker::new();
        for value in [b"1", b"2", b"3"] {
            broker.append("orders", None, value.to_vec());
        }

        let mut first = broker.consumer("group");
        first.subscribe(&["orders"]).unwrap();
        let record = first.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        first.commit(&record).unwrap();
        assert_eq!(broker.committed_offset("group", "orders", 0), Some(1));

        let mut restarted = broker.consumer("group");
        restarted.subscribe(&["orders"]).unwrap();
        let record = restarted.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(record.offset(), 1);

        let mut other_group = broker.consumer("other");
        other_group.subscribe(&["orders"]).unwrap();
        let record = other_group.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(record.offset(), 0);
    }

    #[tokio::test]
    async fn poll_wakes_on_append() {
        let broker = InMemoryBroker::new();
        let mut consumer = broker.consumer("group");
        consumer.subscribe(&["orders"]).unwrap();

        let writer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append("orders", None, b"late".to_vec());
        });

        let record = consumer.poll(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(record.value(), b"late");
    }

    #[test]
    fn same_key_lands_on_same_partition() {
        let broker = InMemoryBroker::new().with_partitions("orders", 8);
        let (first, _) = broker.append("orders", Some(b"order-1"), vec![]);
        let (second, _) = broker.append("orders", Some(b"order-1"), vec![]);
        assert_eq!(first, second);
        assert!((0..8).contains(&first));
    }

    #[test]
    fn empty_topic_name_is_rejected() {
        let mut consumer = InMemoryBroker::new().consumer("group");
        assert!(matches!(
            consumer.subscribe(&[""]),
            Err(BrokerError::Subscription { .. })
        ));
    }

    #[tokio::test]
    async fn injected_poll_error_is_returned_once() {
        let broker = InMemoryBroker::new();
        let mut consumer = broker.consumer("group");
        consumer.subscribe(&["orders"]).unwrap();
        broker.inject_poll_error(PollError::Transport("connection reset".into()));

        let first = consumer.poll(Duration::from_millis(10)).await;
        assert_eq!(first, Err(PollError::Transport("connection reset".into())));
        assert_eq!(consumer.poll(Duration::from_millis(10)).await, Ok(None));
    }

    #[tokio::test]
    async fn producer_reports_each_send() {
        let broker = InMemoryBroker::new();
        let (producer, mut reports) = broker.producer();

        producer
            .send(OutboundRecord::new("orders", "order-1", b"{}".to_vec()), 7)
            .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(
            report,
            DeliveryReport::Delivery {
                tag: 7,
                result: Ok(DeliveryAck {
                    topic: "orders".into(),
                    partition: 0,
                    offset: 0
                }),
            }
        );
        assert_eq!(producer.in_flight_count(), 0);
    }

    #[test]
    fn delivery_completes_after_report_receiver_is_dropped() {
        let broker = InMemoryBroker::new();
        let (producer, reports) = broker.producer();
        drop(reports);

        producer
            .send(OutboundRecord::new("orders", "order-1", b"{}".to_vec()), 3)
            .unwrap();

        assert_eq!(producer.in_flight_count(), 0);
        assert_eq!(broker.records("orders").len(), 1);
        assert!(producer.flush(Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn held_deliveries_make_flush_time_out() {
        let broker = InMemoryBroker::new();
        let (producer, _reports) = broker.producer();
        let producer = producer.holding_deliveries();

        producer
            .send(OutboundRecord::new("orders", "k", vec![]), 1)
            .unwrap();

        let result = producer.flush(Duration::from_millis(5));
        assert!(matches!(
            result,
            Err(BrokerError::FlushIncomplete { outstanding: 1, .. })
        ));
        assert!(broker.records("orders").is_empty());
    }
}
