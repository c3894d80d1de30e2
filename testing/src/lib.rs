//! # EDA Testing
//!
//! Test doubles for the event-driven order pipeline.
//!
//! - [`InMemoryBroker`]: a partitioned log with consumer-group commits, plus
//!   producer and consumer clients implementing the `eda-core` broker traits
//! - [`handlers`]: fake message handlers (recording, failing, slow)
//! - [`mocks`]: deterministic clock
//!
//! ## Example
//!
//! ```
//! use eda_testing::InMemoryBroker;
//!
//! let broker = InMemoryBroker::new();
//! let (partition, offset) = broker.append("order.created", Some(b"order-1"), b"{}".to_vec());
//! assert_eq!((partition, offset), (0, 0));
//! assert_eq!(broker.records("order.created").len(), 1);
//! ```

use chrono::{DateTime, Utc};
use eda_core::environment::Clock;

pub mod broker;
pub mod handlers;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic envelope timestamps.
    ///
    /// # Example
    ///
    /// ```
    /// use eda_testing::mocks::FixedClock;
    /// use eda_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Only if the hardcoded timestamp fails to parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test log subscriber once; later calls are no-ops.
///
/// Honors `RUST_LOG`, defaulting to `debug` for the pipeline crates.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("eda_runtime=debug,eda_testing=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub use broker::{InMemoryBroker, InMemoryConsumer, InMemoryProducer};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(clock.now(), clock.now());
    }
}
