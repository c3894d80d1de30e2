//! Configuration management for the pipeline services.
//!
//! Settings are resolved in three layers, later layers winning:
//!
//! 1. built-in defaults suitable for local development
//! 2. a YAML file (see [`ConfigFile`]) whose nested keys mirror the dotted
//!    setting paths
//! 3. `APP_`-prefixed environment variables named after the dotted setting
//!    path upper-cased with `.` replaced by `_`
//!
//! ```yaml
//! server:
//!   port: 8080
//! kafka:
//!   brokers: [b1:9092, b2:9092]
//!   topics:
//!     order_created: orders
//! logger:
//!   level: debug
//!   output_path: /var/log/order-service.log
//! ```
//!
//! | Setting | Variable | Default |
//! |---------|----------|---------|
//! | `server.host` | `APP_SERVER_HOST` | `0.0.0.0` |
//! | `server.port` | `APP_SERVER_PORT` | `8080` |
//! | `server.publish_timeout_ms` | `APP_SERVER_PUBLISH_TIMEOUT_MS` | `10000` |
//! | `server.shutdown_timeout_ms` | `APP_SERVER_SHUTDOWN_TIMEOUT_MS` | `10000` |
//! | `kafka.brokers` | `APP_KAFKA_BROKERS` | `localhost:9092` |
//! | `kafka.security_protocol` | `APP_KAFKA_SECURITY_PROTOCOL` | `PLAINTEXT` |
//! | `kafka.sasl_mechanism` | `APP_KAFKA_SASL_MECHANISM` | - |
//! | `kafka.sasl_username` | `APP_KAFKA_SASL_USERNAME` | - |
//! | `kafka.sasl_password` | `APP_KAFKA_SASL_PASSWORD` | - |
//! | `kafka.group_id` | `APP_KAFKA_GROUP_ID` | `default-group` |
//! | `kafka.handler_timeout_ms` | `APP_KAFKA_HANDLER_TIMEOUT_MS` | `30000` |
//! | `kafka.topics.<role>` | `APP_KAFKA_TOPICS_<ROLE>` | see [`TopicRole`] |
//! | `logger.level` | `APP_LOGGER_LEVEL` | `info` |
//! | `logger.encoding` | `APP_LOGGER_ENCODING` | `json` |
//! | `logger.output_path` | `APP_LOGGER_OUTPUT_PATH` | `stdout` |
//!
//! `kafka.brokers` is a comma-separated list in the environment and a list
//! or comma-separated string in the file.

use eda_core::broker::BrokerError;
use eda_core::event::EventType;
use eda_redpanda::{KafkaConfig, SaslCredentials};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Prefix shared by every configuration variable.
pub const ENV_PREFIX: &str = "APP";

/// Variable naming an explicit configuration file.
pub const CONFIG_FILE_VAR: &str = "APP_CONFIG_FILE";

/// Locations searched for a configuration file when none is named.
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["config.yaml", "configs/config.yaml"];

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Offending variable
        key: String,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// The settings parse but do not form a usable configuration.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// The Kafka client configuration was rejected.
    #[error("Invalid Kafka configuration: {0}")]
    Kafka(#[from] BrokerError),

    /// A configuration file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid YAML or has an unexpected shape.
    #[error("Malformed config file {}: {reason}", path.display())]
    Malformed {
        /// File that was parsed
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },
}

/// Logical topics the services publish to or consume from.
///
/// Each role maps to a broker topic name; the default name is the wire tag
/// of the event carried on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicRole {
    /// `kafka.topics.order_created`
    OrderCreated,
    /// `kafka.topics.order_confirmed`
    OrderConfirmed,
    /// `kafka.topics.inventory_reserved`
    InventoryReserved,
    /// `kafka.topics.inventory_released`
    InventoryReleased,
    /// `kafka.topics.notification_sent`
    NotificationSent,
}

impl TopicRole {
    /// Every topic role.
    pub const ALL: [Self; 5] = [
        Self::OrderCreated,
        Self::OrderConfirmed,
        Self::InventoryReserved,
        Self::InventoryReleased,
        Self::NotificationSent,
    ];

    /// Setting key under `kafka.topics`.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::OrderCreated => "order_created",
            Self::OrderConfirmed => "order_confirmed",
            Self::InventoryReserved => "inventory_reserved",
            Self::InventoryReleased => "inventory_released",
            Self::NotificationSent => "notification_sent",
        }
    }

    /// Event carried on this topic.
    #[must_use]
    pub const fn event_type(self) -> EventType {
        match self {
            Self::OrderCreated => EventType::OrderCreated,
            Self::OrderConfirmed => EventType::OrderConfirmed,
            Self::InventoryReserved => EventType::InventoryReserved,
            Self::InventoryReleased => EventType::InventoryReleased,
            Self::NotificationSent => EventType::NotificationSent,
        }
    }

    /// Topic name used when none is configured.
    #[must_use]
    pub const fn default_topic(self) -> &'static str {
        self.event_type().as_str()
    }
}

impl fmt::Display for TopicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Topic name for every [`TopicRole`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMap {
    topics: BTreeMap<TopicRole, String>,
}

impl TopicMap {
    /// Topic name for `role`.
    #[must_use]
    pub fn topic(&self, role: TopicRole) -> &str {
        self.topics
            .get(&role)
            .map_or_else(|| role.default_topic(), String::as_str)
    }

    /// Override the topic name for `role`.
    #[must_use]
    pub fn with_topic(mut self, role: TopicRole, topic: impl Into<String>) -> Self {
        self.topics.insert(role, topic.into());
        self
    }
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            topics: TopicRole::ALL
                .into_iter()
                .map(|role| (role, role.default_topic().to_string()))
                .collect(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEncoding {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable
    Console,
}

impl FromStr for LogEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "console" => Ok(Self::Console),
            other => Err(format!("unknown log encoding '{other}', expected json or console")),
        }
    }
}

/// Where log lines are written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output
    #[default]
    Stdout,
    /// Standard error
    Stderr,
    /// Appended to a file
    File(PathBuf),
}

impl LogOutput {
    /// Whether output goes to a terminal stream rather than a file.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stdout | Self::Stderr)
    }
}

impl FromStr for LogOutput {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            path => Self::File(PathBuf::from(path)),
        })
    }
}

/// Settings read from a YAML configuration file.
///
/// Nested mappings are flattened to dotted paths (`kafka.topics.order_created`)
/// with keys lower-cased; lists of scalars become comma-separated values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigFile {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl ConfigFile {
    /// Parse `contents` as the file at `path`.
    ///
    /// An empty document yields no settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] if `contents` is not YAML, the top
    /// level is not a mapping, or a value is neither a scalar nor a list of
    /// scalars.
    pub fn parse(path: impl Into<PathBuf>, contents: &str) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut values = BTreeMap::new();
        if contents.trim().is_empty() {
            return Ok(Self { path, values });
        }

        let malformed = |reason: String| ConfigError::Malformed {
            path: path.clone(),
            reason,
        };

        let root: Value = serde_yaml::from_str(contents).map_err(|e| malformed(e.to_string()))?;
        match &root {
            Value::Null => {},
            Value::Mapping(_) => flatten("", &root, &mut values).map_err(malformed)?,
            _ => return Err(malformed("top level must be a mapping".to_string())),
        }

        Ok(Self { path, values })
    }

    /// Read and parse the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read and
    /// [`ConfigError::Malformed`] if it does not parse.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    /// Read the first of `candidates` that exists.
    ///
    /// Returns `Ok(None)` when none exists.
    ///
    /// # Errors
    ///
    /// See [`ConfigFile::read`].
    pub fn search<I, P>(candidates: I) -> Result<Option<Self>, ConfigError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        candidates
            .into_iter()
            .find(|candidate| Path::is_file(candidate.as_ref()))
            .map(|found| Self::read(found.as_ref()))
            .transpose()
    }

    /// Read `explicit` if given, otherwise search [`CONFIG_SEARCH_PATHS`].
    ///
    /// An explicit path that does not exist is an error; finding nothing
    /// during the search is not.
    ///
    /// # Errors
    ///
    /// See [`ConfigFile::read`].
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        match explicit {
            Some(path) => Self::read(path).map(Some),
            None => Self::search(CONFIG_SEARCH_PATHS),
        }
    }

    /// File the settings came from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value at a dotted setting path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) -> Result<(), String> {
    match value {
        Value::Null => {},
        Value::Mapping(mapping) => {
            for (key, child) in mapping {
                let key = scalar(key)
                    .ok_or_else(|| format!("non-scalar key under '{prefix}'"))?
                    .to_ascii_lowercase();
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out)?;
            }
        },
        Value::Sequence(items) => {
            let items = items
                .iter()
                .map(|item| scalar(item).ok_or_else(|| format!("'{prefix}' must be a list of scalars")))
                .collect::<Result<Vec<_>, _>>()?;
            out.insert(prefix.to_string(), items.join(","));
        },
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out)?,
        scalar_value => {
            let text = scalar(scalar_value).ok_or_else(|| format!("unsupported value at '{prefix}'"))?;
            out.insert(prefix.to_string(), text);
        },
    }
    Ok(())
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Broker configuration
    pub kafka: KafkaSettings,
    /// Logging configuration
    pub logger: LoggerConfig,
    /// Configuration file the settings were layered on, if any
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Deadline for acknowledging a publish made on behalf of a request
    pub publish_timeout: Duration,
    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// `host:port` to bind.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Broker configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    /// Bootstrap brokers
    pub brokers: Vec<String>,
    /// `PLAINTEXT`, `SSL`, `SASL_PLAINTEXT` or `SASL_SSL`
    pub security_protocol: String,
    /// SASL mechanism
    pub sasl_mechanism: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Consumer group for services that do not pin their own
    pub group_id: String,
    /// Per-message handler budget
    pub handler_timeout: Duration,
    /// Topic names
    pub topics: TopicMap,
}

impl fmt::Debug for KafkaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSettings")
            .field("brokers", &self.brokers)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &self.sasl_password.as_ref().map(|_| "<redacted>"))
            .field("group_id", &self.group_id)
            .field("handler_timeout", &self.handler_timeout)
            .field("topics", &self.topics)
            .finish()
    }
}

impl KafkaSettings {
    /// Whether the security protocol needs SASL credentials.
    #[must_use]
    pub fn requires_credentials(&self) -> bool {
        !self.security_protocol.eq_ignore_ascii_case("PLAINTEXT")
    }

    fn credentials(&self) -> Option<SaslCredentials> {
        Some(SaslCredentials {
            mechanism: self.sasl_mechanism.clone()?,
            username: self.sasl_username.clone()?,
            password: self.sasl_password.clone()?,
        })
    }

    /// Build the rdkafka client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Kafka`] if the client configuration is
    /// rejected.
    pub fn client_config(&self, client_id: &str) -> Result<KafkaConfig, ConfigError> {
        let mut builder = KafkaConfig::builder()
            .brokers(self.brokers.join(","))
            .client_id(client_id)
            .security_protocol(self.security_protocol.clone());
        if let Some(credentials) = self.credentials().filter(|_| self.requires_credentials()) {
            builder = builder.sasl(credentials);
        }
        Ok(builder.build()?)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: String,
    /// Output format
    pub encoding: LogEncoding,
    /// Destination
    pub output: LogOutput,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            encoding: LogEncoding::Json,
            output: LogOutput::Stdout,
        }
    }
}

/// Variable name for a dotted setting path.
#[must_use]
pub fn env_key(path: &str) -> String {
    format!("{ENV_PREFIX}_{}", path.replace('.', "_").to_ascii_uppercase())
}

struct Settings<'a, F> {
    lookup: F,
    file: Option<&'a ConfigFile>,
}

impl<F> Settings<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value for `path` and the name it was found under.
    fn entry(&self, path: &str) -> Option<(String, String)> {
        let key = env_key(path);
        if let Some(value) = (self.lookup)(&key).filter(|value| !value.trim().is_empty()) {
            return Some((key, value));
        }
        self.file
            .and_then(|file| file.get(path))
            .filter(|value| !value.trim().is_empty())
            .map(|value| (path.to_string(), value.to_string()))
    }

    fn string(&self, path: &str) -> Option<String> {
        self.entry(path).map(|(_, value)| value)
    }

    fn string_or(&self, path: &str, default: &str) -> String {
        self.string(path).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, path: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.entry(path) {
            None => Ok(default),
            Some((key, value)) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value,
                reason: e.to_string(),
            }),
        }
    }

    fn millis_or(&self, path: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse_or(path, default).map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from the configuration file and the process
    /// environment.
    ///
    /// A `.env` file in the working directory is read first; variables
    /// already set in the environment win. The configuration file is the one
    /// named by [`CONFIG_FILE_VAR`], or the first of [`CONFIG_SEARCH_PATHS`]
    /// that exists.
    ///
    /// # Errors
    ///
    /// See [`ConfigFile::discover`] and [`Config::from_sources`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let explicit = std::env::var_os(CONFIG_FILE_VAR)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        let file = ConfigFile::discover(explicit.as_deref())?;
        Self::from_sources(file.as_ref(), |key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup, without a file.
    ///
    /// # Errors
    ///
    /// See [`Config::from_sources`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_sources(None, lookup)
    }

    /// Load configuration from `file` overlaid with a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for values that do not parse and
    /// [`ConfigError::Validation`] for settings that do not fit together.
    pub fn from_sources<F>(file: Option<&ConfigFile>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Settings { lookup, file };

        let topics = TopicRole::ALL
            .into_iter()
            .fold(TopicMap::default(), |topics, role| {
                match settings.string(&format!("kafka.topics.{}", role.key())) {
                    Some(topic) => topics.with_topic(role, topic),
                    None => topics,
                }
            });

        let brokers = settings
            .string_or("kafka.brokers", "localhost:9092")
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(str::to_string)
            .collect();

        let config = Self {
            server: ServerConfig {
                host: settings.string_or("server.host", "0.0.0.0"),
                port: settings.parse_or("server.port", 8080)?,
                publish_timeout: settings
                    .millis_or("server.publish_timeout_ms", Duration::from_secs(10))?,
                shutdown_timeout: settings
                    .millis_or("server.shutdown_timeout_ms", Duration::from_secs(10))?,
            },
            kafka: KafkaSettings {
                brokers,
                security_protocol: settings.string_or("kafka.security_protocol", "PLAINTEXT"),
                sasl_mechanism: settings.string("kafka.sasl_mechanism"),
                sasl_username: settings.string("kafka.sasl_username"),
                sasl_password: settings.string("kafka.sasl_password"),
                group_id: settings.string_or("kafka.group_id", "default-group"),
                handler_timeout: settings
                    .millis_or("kafka.handler_timeout_ms", Duration::from_secs(30))?,
                topics,
            },
            logger: LoggerConfig {
                level: settings.string_or("logger.level", "info"),
                encoding: settings.parse_or("logger.encoding", LogEncoding::Json)?,
                output: settings.parse_or("logger.output_path", LogOutput::Stdout)?,
            },
            source_file: file.map(|file| file.path().to_path_buf()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the settings form a usable configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Validation(
                "at least one Kafka broker is required".to_string(),
            ));
        }
        if self.kafka.group_id.trim().is_empty() {
            return Err(ConfigError::Validation("kafka group id is empty".to_string()));
        }
        if self.kafka.requires_credentials() && self.kafka.credentials().is_none() {
            return Err(ConfigError::Validation(format!(
                "security protocol {} requires sasl_mechanism, sasl_username and sasl_password",
                self.kafka.security_protocol
            )));
        }
        if self.server.publish_timeout.is_zero() || self.kafka.handler_timeout.is_zero() {
            return Err(ConfigError::Validation("timeouts must be positive".to_string()));
        }
        if let Err(e) = self.logger.level.parse::<LevelFilter>() {
            return Err(ConfigError::Invalid {
                key: env_key("logger.level"),
                value: self.logger.level.clone(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}
