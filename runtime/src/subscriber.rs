//! Poll, dispatch, commit.
//!
//! # State machine
//!
//! ```text
//! Created ──subscribe──▶ Subscribed ──run──▶ Running ──cancel──▶ Stopped
//!                                               │                     ▲
//!                                               └─cancel mid-handler─▶ Stopping
//! ```
//!
//! The current state is published on a watch channel
//! ([`Subscriber::watch_state`]) so it can be followed while the loop runs on
//! its own task.
//!
//! # Delivery semantics
//!
//! At-least-once. A record's position is committed only after its handler
//! returned `Ok`. When a handler fails, its partition is fenced for the rest of
//! the run: later records on that partition are still processed but their
//! positions are not committed, because committing a later offset would move
//! the group past the failed record. After a restart the group resumes at the
//! failed record.
//!
//! Records for topics without a handler are logged and committed.

use eda_core::broker::{BrokerError, ConsumerClient, MessageRecord, PollError};
use eda_core::context::Context;
use eda_core::handler::{HandlerError, HandlerRegistry};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

/// Lifecycle of a [`Subscriber`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    /// Constructed, no subscription yet.
    Created,
    /// Topic list registered with the client.
    Subscribed,
    /// Inside the poll loop.
    Running,
    /// Cancellation observed while a handler is still running.
    Stopping,
    /// Loop exited.
    Stopped,
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Subscribed => "subscribed",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Errors that end or prevent the consume loop.
///
/// Cancellation is not an error: [`Subscriber::run`] returns `Ok(())`.
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// `subscribe` was called with no topics.
    #[error("Cannot subscribe to an empty topic list")]
    EmptyTopicList,

    /// The client rejected the subscription.
    #[error("Subscription rejected: {0}")]
    Subscribe(#[source] BrokerError),

    /// An operation was called in the wrong lifecycle state.
    #[error("Subscriber is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires
        expected: SubscriberState,
        /// Current state
        actual: SubscriberState,
    },
}

/// Timing knobs of the consume loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Longest single poll wait; bounds how late cancellation is noticed.
    pub poll_timeout: Duration,
    /// Per-record handler budget.
    pub handler_timeout: Duration,
}

impl SubscriberConfig {
    /// Set the poll wait.
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the per-record handler budget.
    #[must_use]
    pub const fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// Consume loop over one consumer client.
///
/// Handlers run one at a time, in delivery order.
pub struct Subscriber<C: ConsumerClient> {
    client: C,
    registry: HandlerRegistry,
    config: SubscriberConfig,
    state: watch::Sender<SubscriberState>,
    topics: Vec<String>,
    fenced: HashSet<(String, i32)>,
    span: Span,
}

impl<C: ConsumerClient> Subscriber<C> {
    /// Wrap `client`, dispatching through `registry`.
    #[must_use]
    pub fn new(client: C, registry: HandlerRegistry, span: Span) -> Self {
        Self {
            client,
            registry,
            config: SubscriberConfig::default(),
            state: watch::channel(SubscriberState::Created).0,
            topics: Vec::new(),
            fenced: HashSet::new(),
            span,
        }
    }

    /// Replace the timing configuration.
    #[must_use]
    pub const fn with_config(mut self, config: SubscriberConfig) -> Self {
        self.config = config;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Follow state changes, including those made by a spawned loop.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SubscriberState) {
        self.state.send_replace(state);
    }

    /// Topics passed to [`subscribe`](Self::subscribe).
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// The wrapped client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Register the topic subscription with the client.
    ///
    /// # Errors
    ///
    /// - [`SubscriberError::InvalidState`] unless the subscriber is `Created`
    /// - [`SubscriberError::EmptyTopicList`] if `topics` is empty
    /// - [`SubscriberError::Subscribe`] if the client rejects the topics
    pub fn subscribe(&mut self, topics: &[&str]) -> Result<(), SubscriberError> {
        let _entered = self.span.enter();

        if self.state() != SubscriberState::Created {
            return Err(SubscriberError::InvalidState {
                expected: SubscriberState::Created,
                actual: self.state(),
            });
        }
        if topics.is_empty() {
            return Err(SubscriberError::EmptyTopicList);
        }

        self.client.subscribe(topics).map_err(|error| {
            tracing::error!(topics = ?topics, error = %error, "Subscription rejected");
            SubscriberError::Subscribe(error)
        })?;

        for topic in topics {
            if !self.registry.contains(topic) {
                tracing::warn!(topic = %topic, "Subscribed to topic without a handler");
            }
        }

        self.topics = topics.iter().map(|topic| (*topic).to_string()).collect();
        self.set_state(SubscriberState::Subscribed);
        tracing::info!(topics = ?self.topics, "Subscribed to topics");
        Ok(())
    }

    /// Run the consume loop until `cancel` fires.
    ///
    /// Handlers receive a context derived from `cancel`, so cancellation also
    /// reaches the record being processed.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::InvalidState`] unless the subscriber is
    /// `Subscribed`. Cancellation is reported as `Ok(())`.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), SubscriberError> {
        if self.state() != SubscriberState::Subscribed {
            return Err(SubscriberError::InvalidState {
                expected: SubscriberState::Subscribed,
                actual: self.state(),
            });
        }
        let span = self.span.clone();
        self.consume(cancel).instrument(span).await;
        Ok(())
    }

    /// Run the loop on its own task.
    ///
    /// Loop errors are sent to `errors`; the task hands the subscriber back
    /// when it finishes.
    pub fn spawn(
        mut self,
        cancel: CancellationToken,
        errors: mpsc::Sender<SubscriberError>,
    ) -> JoinHandle<Self> {
        tokio::spawn(async move {
            if let Err(error) = self.run(&cancel).await {
                tracing::error!(parent: &self.span, error = %error, "Consume loop failed");
                if errors.send(error).await.is_err() {
                    tracing::debug!(parent: &self.span, "Error channel closed");
                }
            }
            self
        })
    }

    async fn consume(&mut self, cancel: &CancellationToken) {
        self.set_state(SubscriberState::Running);
        tracing::info!(
            topics = ?self.topics,
            poll_timeout_ms = duration_ms(self.config.poll_timeout),
            handler_timeout_ms = duration_ms(self.config.handler_timeout),
            "Consume loop started"
        );

        let root = Context::with_cancellation(cancel.clone());
        let poll_timeout = self.config.poll_timeout;

        loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                polled = self.client.poll(poll_timeout) => polled,
            };

            match polled {
                Ok(Some(record)) => self.process(&root, cancel, &record).await,
                Ok(None) | Err(PollError::TimedOut) => {},
                Err(PollError::Transport(reason)) => {
                    tracing::warn!(error = %reason, "Poll failed");
                },
            }
        }

        self.set_state(SubscriberState::Stopped);
        tracing::info!("Consume loop stopped");
    }

    async fn process(
        &mut self,
        root: &Context,
        cancel: &CancellationToken,
        record: &MessageRecord,
    ) {
        let Some(handler) = self.registry.dispatch(record.topic()) else {
            tracing::warn!(
                topic = record.topic(),
                partition = record.partition(),
                offset = record.offset(),
                "No handler registered for topic, skipping record"
            );
            self.commit(record);
            return;
        };

        let budget = self.config.handler_timeout;
        let ctx = root.with_timeout(budget);
        let handling = tokio::time::timeout(budget, handler.handle(&ctx, record));
        tokio::pin!(handling);
        let timed = tokio::select! {
            biased;
            timed = &mut handling => timed,
            () = cancel.cancelled() => {
                self.set_state(SubscriberState::Stopping);
                tracing::info!(
                    topic = record.topic(),
                    partition = record.partition(),
                    offset = record.offset(),
                    "Cancellation received, waiting for in-flight handler"
                );
                handling.await
            },
        };
        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) => Err(HandlerError::DeadlineExceeded(budget)),
        };

        match outcome {
            Ok(()) => self.commit(record),
            Err(error) => {
                tracing::error!(
                    topic = record.topic(),
                    partition = record.partition(),
                    offset = record.offset(),
                    key = %record.key_lossy(),
                    error = %error,
                    "Handler failed, offset not committed"
                );
                self.fenced
                    .insert((record.topic().to_string(), record.partition()));
            },
        }
    }

    fn commit(&mut self, record: &MessageRecord) {
        if self
            .fenced
            .contains(&(record.topic().to_string(), record.partition()))
        {
            tracing::warn!(
                topic = record.topic(),
                partition = record.partition(),
                offset = record.offset(),
                "Holding commit behind an earlier failed record on this partition"
            );
            return;
        }

        match self.client.commit(record) {
            Ok(()) => tracing::debug!(
                topic = record.topic(),
                partition = record.partition(),
                offset = record.offset(),
                "Committed offset"
            ),
            Err(error) => tracing::warn!(
                topic = record.topic(),
                partition = record.partition(),
                offset = record.offset(),
                error = %error,
                "Failed to commit offset (record may be redelivered)"
            ),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
