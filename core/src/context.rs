//! Deadline and cancellation scope.
//!
//! A [`Context`] is handed to every publish and every handler invocation. It
//! combines a [`CancellationToken`] (process shutdown) with an optional
//! deadline (caller or per-message budget). Derived contexts get a child
//! token, so cancelling the root reaches every in-flight operation while a
//! derived context can never cancel its parent.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The cancellation token fired.
    #[error("context cancelled")]
    Cancelled,

    /// The deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that ends when `token` is cancelled.
    #[must_use]
    pub const fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that also expires after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that also expires at `deadline`.
    ///
    /// The earlier of the parent's deadline and `deadline` wins.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = self
            .deadline
            .map_or(deadline, |parent| parent.min(deadline));
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Effective deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if any.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Token observed by this context.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the token fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Some` once the context is done, `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve when the context is done.
    ///
    /// Cancellation wins when both conditions hold.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => ContextError::Cancelled,
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            },
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
