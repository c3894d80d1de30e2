use crate::config::KafkaConfig;
use eda_core::broker::{BrokerError, ConsumerClient, MessageRecord, PollError, PollFuture};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;

/// Manually committing rdkafka consumer implementing [`ConsumerClient`].
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// Create a consumer in `group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ClientCreation`] if rdkafka rejects the
    /// configuration.
    pub fn new(config: &KafkaConfig, group_id: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = config
            .consumer_config(group_id)
            .create()
            .map_err(|e| BrokerError::ClientCreation(format!("Failed to create consumer: {e}")))?;

        tracing::info!(
            brokers = %config.brokers(),
            consumer_group = %group_id,
            manual_commit = true,
            "Kafka consumer created"
        );
        Ok(Self {
            consumer,
            group_id: group_id.to_string(),
        })
    }

    /// Consumer group of this consumer.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> MessageRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    (
                        header.key.to_string(),
                        header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let record = MessageRecord::new(
        message.topic(),
        message.partition(),
        message.offset(),
        message.key().map(<[u8]>::to_vec),
        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    )
    .with_headers(headers);

    match message.timestamp().to_millis() {
        Some(millis) => record.with_timestamp_ms(millis),
        None => record,
    }
}

impl ConsumerClient for KafkaConsumer {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), BrokerError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| BrokerError::Subscription {
                topics: topics.iter().map(|topic| (*topic).to_string()).collect(),
                reason: e.to_string(),
            })
    }

    fn poll(&mut self, timeout: Duration) -> PollFuture<'_> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Err(_) => Ok(None),
                Ok(Ok(message)) => Ok(Some(to_record(&message))),
                Ok(Err(KafkaError::MessageConsumption(RDKafkaErrorCode::OperationTimedOut))) => {
                    Err(PollError::TimedOut)
                },
                Ok(Err(error)) => Err(PollError::Transport(error.to_string())),
            }
        })
    }

    fn commit(&mut self, record: &MessageRecord) -> Result<(), BrokerError> {
        let commit_error = |reason: String| BrokerError::Commit {
            topic: record.topic().to_string(),
            partition: record.partition(),
            offset: record.offset(),
            reason,
        };

        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(
                record.topic(),
                record.partition(),
                Offset::Offset(record.offset() + 1),
            )
            .map_err(|e| commit_error(e.to_string()))?;

        self.consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| commit_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_consumer_is_send() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<KafkaConsumer>();
    }
}
