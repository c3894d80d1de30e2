//! Message handlers and the topic registry.
//!
//! A handler receives one [`MessageRecord`] together with a [`Context`] that
//! carries the per-message deadline and the process cancellation token. It
//! reports success or failure; the subscriber commits only on success.
//!
//! Handlers must be idempotent. Delivery is at-least-once, so a record whose
//! commit was lost is handed to a handler again after a restart.

use crate::broker::MessageRecord;
use crate::context::Context;
use crate::envelope::CodecError;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Future returned by [`MessageHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Why a handler did not process a record.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The record value was not a valid envelope or payload.
    #[error("Failed to decode record: {0}")]
    Decode(#[from] CodecError),

    /// The per-message budget ran out before the handler finished.
    #[error("Handler exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    /// The handler observed cancellation and stopped early.
    #[error("Handler cancelled")]
    Cancelled,

    /// Any other processing failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Failure with a plain message.
    #[must_use]
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Other(anyhow::anyhow!("{message}"))
    }
}

/// Processing capability for records of one topic.
///
/// The method returns a boxed future so handlers can be stored as trait
/// objects in the [`HandlerRegistry`].
pub trait MessageHandler: Send + Sync {
    /// Process one record within the budget carried by `ctx`.
    ///
    /// # Errors
    ///
    /// Any error leaves the record uncommitted.
    fn handle<'a>(&'a self, ctx: &'a Context, record: &'a MessageRecord) -> HandlerFuture<'a>;
}

impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    fn handle<'a>(&'a self, ctx: &'a Context, record: &'a MessageRecord) -> HandlerFuture<'a> {
        (**self).handle(ctx, record)
    }
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Context, MessageRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a Context, record: &'a MessageRecord) -> HandlerFuture<'a> {
        Box::pin((self.f)(ctx.clone(), record.clone()))
    }
}

/// Build a handler from an async closure.
///
/// # Examples
///
/// ```
/// use eda_core::handler::{HandlerRegistry, handler_fn};
///
/// let registry = HandlerRegistry::new().with_handler(
///     "order.created",
///     handler_fn(|_ctx, record| async move {
///         tracing::info!(offset = record.offset(), "seen");
///         Ok(())
///     }),
/// );
/// assert!(registry.contains("order.created"));
/// ```
pub const fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Context, MessageRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

/// Topic name to handler mapping.
///
/// Populated before the subscriber starts and read-only afterwards; at most
/// one handler per topic.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `topic`, replacing any previous binding.
    pub fn register<H>(&mut self, topic: impl Into<String>, handler: H) -> &mut Self
    where
        H: MessageHandler + 'static,
    {
        let topic = topic.into();
        if self.handlers.insert(topic.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(topic = %topic, "Replaced existing handler");
        } else {
            tracing::info!(topic = %topic, "Registered handler");
        }
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_handler<H>(mut self, topic: impl Into<String>, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        self.register(topic, handler);
        self
    }

    /// Handler bound to `topic`.
    #[must_use]
    pub fn dispatch(&self, topic: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(topic).cloned()
    }

    /// Whether a handler is bound to `topic`.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    /// Registered topics in sorted order.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}
