use crate::config::KafkaConfig;
use eda_core::broker::{
    BrokerError, DeliveryAck, DeliveryReport, DeliveryReportSender, DeliveryReports, DeliveryTag,
    OutboundRecord, ProducerClient, delivery_channel,
};
use rdkafka::ClientContext;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use std::time::Duration;

/// rdkafka context forwarding delivery callbacks onto a report channel.
///
/// Callbacks run on the producer's polling thread; forwarding through an
/// unbounded channel never blocks it.
pub struct ReportingContext {
    reports: DeliveryReportSender,
}

impl ClientContext for ReportingContext {
    fn error(&self, error: KafkaError, reason: &str) {
        tracing::error!(error = %error, reason, "Kafka client error");
        let report = DeliveryReport::ClientError(BrokerError::Transport(format!("{error}: {reason}")));
        if self.reports.send(report).is_err() {
            tracing::debug!("Delivery report receiver dropped");
        }
    }
}

impl ProducerContext for ReportingContext {
    type DeliveryOpaque = Box<DeliveryTag>;

    fn delivery(&self, result: &DeliveryResult<'_>, tag: Self::DeliveryOpaque) {
        let result = match result {
            Ok(message) => Ok(DeliveryAck {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            }),
            Err((error, message)) => Err(BrokerError::Delivery {
                topic: message.topic().to_string(),
                reason: error.to_string(),
            }),
        };
        if self
            .reports
            .send(DeliveryReport::Delivery { tag: *tag, result })
            .is_err()
        {
            tracing::debug!(tag = *tag, "Delivery report receiver dropped");
        }
    }
}

/// Idempotent rdkafka producer implementing [`ProducerClient`].
pub struct KafkaProducer {
    producer: ThreadedProducer<ReportingContext>,
}

impl KafkaProducer {
    /// Create the producer and the channel its delivery reports arrive on.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ClientCreation`] if rdkafka rejects the
    /// configuration.
    pub fn new(config: &KafkaConfig) -> Result<(Self, DeliveryReports), BrokerError> {
        let (reports_tx, reports_rx) = delivery_channel();
        let producer: ThreadedProducer<ReportingContext> = config
            .producer_config()
            .create_with_context(ReportingContext {
                reports: reports_tx,
            })
            .map_err(|e| BrokerError::ClientCreation(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %config.brokers(), "Kafka producer created");
        Ok((Self { producer }, reports_rx))
    }
}

impl ProducerClient for KafkaProducer {
    fn send(&self, record: OutboundRecord, tag: DeliveryTag) -> Result<(), BrokerError> {
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key,
                    value: Some(value.as_slice()),
                })
            });

        let base = BaseRecord::with_opaque_to(&record.topic, Box::new(tag))
            .key(&record.key)
            .payload(&record.value)
            .headers(headers);

        self.producer
            .send(base)
            .map_err(|(error, _)| BrokerError::Enqueue {
                topic: record.topic.clone(),
                reason: error.to_string(),
            })
    }

    fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.producer
            .flush(timeout)
            .map_err(|error| BrokerError::FlushIncomplete {
                outstanding: self.in_flight_count(),
                reason: error.to_string(),
            })
    }

    fn in_flight_count(&self) -> usize {
        usize::try_from(self.producer.in_flight_count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_producer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<KafkaProducer>();
    }
}
