//! Fake message handlers.
//!
//! All fakes are cheap to clone and share their observations between clones,
//! so a test keeps one clone and registers the other.

use eda_core::broker::MessageRecord;
use eda_core::context::Context;
use eda_core::handler::{HandlerError, HandlerFuture, MessageHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Succeeds and remembers every record it saw.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<MessageRecord>>>,
}

impl RecordingHandler {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records seen so far, in handling order.
    #[must_use]
    pub fn records(&self) -> Vec<MessageRecord> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records seen.
    #[must_use]
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle<'a>(&'a self, _ctx: &'a Context, record: &'a MessageRecord) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.clone());
            Ok(())
        })
    }
}

/// Fails, either always or for the first `n` attempts.
#[derive(Clone)]
pub struct FailingHandler {
    reason: String,
    failures_left: Option<Arc<AtomicUsize>>,
    attempts: Arc<AtomicUsize>,
}

impl FailingHandler {
    /// Fail every attempt.
    #[must_use]
    pub fn always(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            failures_left: None,
            attempts: Arc::default(),
        }
    }

    /// Fail the first `n` attempts, then succeed.
    #[must_use]
    pub fn times(n: usize, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            failures_left: Some(Arc::new(AtomicUsize::new(n))),
            attempts: Arc::default(),
        }
    }

    /// Attempts so far, failed or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        self.failures_left.as_ref().is_none_or(|left| {
            left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        })
    }
}

impl MessageHandler for FailingHandler {
    fn handle<'a>(&'a self, _ctx: &'a Context, _record: &'a MessageRecord) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.should_fail() {
                Err(HandlerError::failed(&self.reason))
            } else {
                Ok(())
            }
        })
    }
}

/// Succeeds after sleeping, ignoring its context.
///
/// Used to exercise the per-record deadline enforced by the subscriber.
#[derive(Clone)]
pub struct SlowHandler {
    delay: Duration,
    completed: Arc<AtomicUsize>,
}

impl SlowHandler {
    /// Sleep `delay` per record.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: Arc::default(),
        }
    }

    /// Records whose sleep ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl MessageHandler for SlowHandler {
    fn handle<'a>(&'a self, _ctx: &'a Context, _record: &'a MessageRecord) -> HandlerFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record() -> MessageRecord {
        MessageRecord::new("t", 0, 0, None, vec![])
    }

    #[tokio::test]
    async fn failing_handler_recovers_after_n_failures() {
        let handler = FailingHandler::times(2, "boom");
        let ctx = Context::background();

        assert!(handler.handle(&ctx, &record()).await.is_err());
        assert!(handler.handle(&ctx, &record()).await.is_err());
        assert!(handler.handle(&ctx, &record()).await.is_ok());
        assert_eq!(handler.attempts(), 3);
    }

    #[tokio::test]
    async fn recording_handler_shares_state_between_clones() {
        let handler = RecordingHandler::new();
        let registered = handler.clone();

        registered
            .handle(&Context::background(), &record())
            .await
            .unwrap();
        assert_eq!(handler.count(), 1);
    }
}
