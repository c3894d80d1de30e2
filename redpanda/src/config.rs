use eda_core::broker::BrokerError;
use rdkafka::config::ClientConfig;
use std::fmt;
use std::time::Duration;

/// SASL credentials for non-`PLAINTEXT` security protocols.
#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    /// SASL mechanism (e.g. `PLAIN`, `SCRAM-SHA-256`)
    pub mechanism: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Producer and consumer configuration for rdkafka clients.
///
/// Defaults describe an idempotent, durable producer and a manually
/// committing consumer:
///
/// | Setting | Default |
/// |---------|---------|
/// | `acks` | `all` |
/// | `retries` | `3` |
/// | `max.in.flight.requests.per.connection` | `5` |
/// | `enable.idempotence` | `true` |
/// | `compression.type` | `snappy` |
/// | `linger.ms` | `5` |
/// | `batch.size` | `16384` |
/// | `enable.auto.commit` | `false` |
/// | `auto.offset.reset` | `earliest` |
/// | `session.timeout.ms` | `6000` |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KafkaConfig {
    brokers: String,
    client_id: Option<String>,
    security_protocol: String,
    sasl: Option<SaslCredentials>,
    acks: String,
    retries: u32,
    max_in_flight: u32,
    enable_idempotence: bool,
    compression: String,
    linger: Duration,
    batch_size: u32,
    message_timeout: Option<Duration>,
    session_timeout: Duration,
    auto_offset_reset: String,
}

impl KafkaConfig {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> KafkaConfigBuilder {
        KafkaConfigBuilder::default()
    }

    /// Comma separated bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// rdkafka configuration for a producer.
    #[must_use]
    pub fn producer_config(&self) -> ClientConfig {
        let mut config = self.common_config();
        config
            .set("acks", &self.acks)
            .set("retries", self.retries.to_string())
            .set(
                "max.in.flight.requests.per.connection",
                self.max_in_flight.to_string(),
            )
            .set("enable.idempotence", self.enable_idempotence.to_string())
            .set("compression.type", &self.compression)
            .set("linger.ms", millis(self.linger))
            .set("batch.size", self.batch_size.to_string());
        if let Some(timeout) = self.message_timeout {
            config.set("message.timeout.ms", millis(timeout));
        }
        config
    }

    /// rdkafka configuration for a consumer in `group_id`.
    #[must_use]
    pub fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = self.common_config();
        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", millis(self.session_timeout))
            .set("enable.partition.eof", "false");
        config
    }

    fn common_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("security.protocol", &self.security_protocol);
        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        if let Some(sasl) = &self.sasl {
            config
                .set("sasl.mechanism", &sasl.mechanism)
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }
        config
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

/// Builder for [`KafkaConfig`].
///
/// # Example
///
/// ```
/// use eda_redpanda::KafkaConfig;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = KafkaConfig::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .compression("lz4")
///     .linger(Duration::from_millis(10))
///     .build()?;
/// assert_eq!(config.producer_config().get("compression.type"), Some("lz4"));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Default)]
pub struct KafkaConfigBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    security_protocol: Option<String>,
    sasl: Option<SaslCredentials>,
    acks: Option<String>,
    retries: Option<u32>,
    max_in_flight: Option<u32>,
    enable_idempotence: Option<bool>,
    compression: Option<String>,
    linger: Option<Duration>,
    batch_size: Option<u32>,
    message_timeout: Option<Duration>,
    session_timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl KafkaConfigBuilder {
    /// Comma separated bootstrap servers (required).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Client id reported to the broker.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Security protocol (`PLAINTEXT`, `SSL`, `SASL_PLAINTEXT`, `SASL_SSL`).
    ///
    /// Default: `PLAINTEXT`
    #[must_use]
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// SASL credentials.
    #[must_use]
    pub fn sasl(mut self, credentials: SaslCredentials) -> Self {
        self.sasl = Some(credentials);
        self
    }

    /// Producer acknowledgment mode: `0`, `1` or `all`.
    ///
    /// Default: `all`
    #[must_use]
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Producer retry count.
    ///
    /// Default: 3
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Maximum in-flight requests per connection.
    ///
    /// Default: 5
    #[must_use]
    pub const fn max_in_flight(mut self, max: u32) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    /// Broker-side deduplication of producer retries.
    ///
    /// Default: `true`
    #[must_use]
    pub const fn enable_idempotence(mut self, enabled: bool) -> Self {
        self.enable_idempotence = Some(enabled);
        self
    }

    /// Compression codec: `none`, `gzip`, `snappy`, `lz4`, `zstd`.
    ///
    /// Default: `snappy`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Time the producer waits to fill a batch.
    ///
    /// Default: 5 ms
    #[must_use]
    pub const fn linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }

    /// Maximum batch size in bytes.
    ///
    /// Default: 16384
    #[must_use]
    pub const fn batch_size(mut self, bytes: u32) -> Self {
        self.batch_size = Some(bytes);
        self
    }

    /// Upper bound on the time a record may wait for delivery, retries
    /// included. Unset keeps the librdkafka default.
    #[must_use]
    pub const fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = Some(timeout);
        self
    }

    /// Consumer group session timeout.
    ///
    /// Default: 6 s
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Where a group without a committed position starts: `earliest` or `latest`.
    ///
    /// Default: `earliest`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ClientCreation`] if:
    /// - brokers are not set or empty
    /// - a SASL protocol is selected without credentials
    pub fn build(self) -> Result<KafkaConfig, BrokerError> {
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| BrokerError::ClientCreation("Brokers not configured".to_string()))?;

        let security_protocol = self
            .security_protocol
            .unwrap_or_else(|| "PLAINTEXT".to_string());
        if security_protocol.to_ascii_uppercase().starts_with("SASL") && self.sasl.is_none() {
            return Err(BrokerError::ClientCreation(format!(
                "Security protocol {security_protocol} requires SASL credentials"
            )));
        }

        Ok(KafkaConfig {
            brokers,
            client_id: self.client_id,
            security_protocol,
            sasl: self.sasl,
            acks: self.acks.unwrap_or_else(|| "all".to_string()),
            retries: self.retries.unwrap_or(3),
            max_in_flight: self.max_in_flight.unwrap_or(5),
            enable_idempotence: self.enable_idempotence.unwrap_or(true),
            compression: self.compression.unwrap_or_else(|| "snappy".to_string()),
            linger: self.linger.unwrap_or(Duration::from_millis(5)),
            batch_size: self.batch_size.unwrap_or(16_384),
            message_timeout: self.message_timeout,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(6)),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn producer_defaults_are_idempotent_and_durable() {
        let config = KafkaConfig::builder().brokers("localhost:9092").build().unwrap();
        let producer = config.producer_config();

        assert_eq!(producer.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(producer.get("security.protocol"), Some("PLAINTEXT"));
        assert_eq!(producer.get("acks"), Some("all"));
        assert_eq!(producer.get("retries"), Some("3"));
        assert_eq!(producer.get("max.in.flight.requests.per.connection"), Some("5"));
        assert_eq!(producer.get("enable.idempotence"), Some("true"));
        assert_eq!(producer.get("compression.type"), Some("snappy"));
        assert_eq!(producer.get("linger.ms"), Some("5"));
        assert_eq!(producer.get("batch.size"), Some("16384"));
        assert_eq!(producer.get("message.timeout.ms"), None);
        assert_eq!(producer.get("group.id"), None);
    }

    #[test]
    fn consumer_commits_manually() {
        let config = KafkaConfig::builder().brokers("localhost:9092").build().unwrap();
        let consumer = config.consumer_config("inventory-service-group");

        assert_eq!(consumer.get("group.id"), Some("inventory-service-group"));
        assert_eq!(consumer.get("enable.auto.commit"), Some("false"));
        assert_eq!(consumer.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(consumer.get("session.timeout.ms"), Some("6000"));
        assert_eq!(consumer.get("acks"), None);
    }

    #[test]
    fn missing_brokers_are_rejected() {
        assert!(matches!(
            KafkaConfig::builder().build(),
            Err(BrokerError::ClientCreation(_))
        ));
        assert!(KafkaConfig::builder().brokers("  ").build().is_err());
    }

    #[test]
    fn sasl_protocol_requires_credentials() {
        let result = KafkaConfig::builder()
            .brokers("localhost:9092")
            .security_protocol("SASL_SSL")
            .build();
        assert!(matches!(result, Err(BrokerError::ClientCreation(_))));

        let config = KafkaConfig::builder()
            .brokers("localhost:9092")
            .security_protocol("SASL_SSL")
            .sasl(SaslCredentials {
                mechanism: "PLAIN".into(),
                username: "svc".into(),
                password: "secret".into(),
            })
            .client_id("order-service")
            .build()
            .unwrap();
        let producer = config.producer_config();
        assert_eq!(producer.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(producer.get("client.id"), Some("order-service"));
        assert!(!format!("{config:?}").contains("secret"));
    }
}
