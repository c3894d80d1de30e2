//! Process lifecycle shared by the service binaries.
//!
//! ```text
//! subscribe ─► spawn consume loop ─► wait_for_shutdown ─► cancel ─► await loop ─► close publisher
//! ```

use eda_core::broker::ConsumerClient;
use eda_runtime::{Subscriber, SubscriberError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Why a service began shutting down.
#[derive(Debug)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM was received.
    Signal,
    /// The consume loop reported an error.
    ConsumerFailed(SubscriberError),
}

/// Wait for SIGTERM or Ctrl+C.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is never observed.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

/// A consume loop running in the background.
pub struct RunningSubscriber<C: ConsumerClient> {
    cancel: CancellationToken,
    handle: JoinHandle<Subscriber<C>>,
    errors: mpsc::Receiver<SubscriberError>,
}

impl<C: ConsumerClient> RunningSubscriber<C> {
    /// Spawn `subscriber`'s consume loop under `cancel`.
    ///
    /// The subscriber must already be subscribed.
    pub fn start(subscriber: Subscriber<C>, cancel: CancellationToken) -> Self {
        let (errors_tx, errors) = mpsc::channel(1);
        let handle = subscriber.spawn(cancel.clone(), errors_tx);
        Self {
            cancel,
            handle,
            errors,
        }
    }

    /// Wait until a signal arrives or the loop fails.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        tokio::select! {
            () = wait_for_signal() => ShutdownReason::Signal,
            Some(error) = self.errors.recv() => {
                error!(error = %error, "Consumer error");
                ShutdownReason::ConsumerFailed(error)
            },
        }
    }

    /// Cancel the loop and wait for it to return.
    ///
    /// # Errors
    ///
    /// Returns the join error if the consume task panicked.
    pub async fn stop(self) -> Result<Subscriber<C>, tokio::task::JoinError> {
        self.cancel.cancel();
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_core::handler::HandlerRegistry;
    use eda_runtime::SubscriberState;
    use eda_testing::InMemoryBroker;
    use eda_testing::handlers::RecordingHandler;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_returns_stopped_subscriber() {
        let broker = InMemoryBroker::new();
        let recorder = RecordingHandler::new();
        let mut subscriber = Subscriber::new(
            broker.consumer("lifecycle-group"),
            HandlerRegistry::new().with_handler("orders", recorder.clone()),
            tracing::Span::none(),
        );
        subscriber.subscribe(&["orders"]).unwrap();

        let running = RunningSubscriber::start(subscriber, CancellationToken::new());
        broker.append("orders", Some(b"k"), b"v".to_vec());
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let subscriber = running.stop().await.unwrap();
        assert_eq!(subscriber.state(), SubscriberState::Stopped);
    }

    #[tokio::test]
    async fn test_loop_error_triggers_shutdown() {
        let broker = InMemoryBroker::new();
        let subscriber = Subscriber::new(
            broker.consumer("lifecycle-group"),
            HandlerRegistry::new(),
            tracing::Span::none(),
        );

        let mut running = RunningSubscriber::start(subscriber, CancellationToken::new());
        let reason = tokio::time::timeout(Duration::from_secs(5), running.wait_for_shutdown())
            .await
            .unwrap();

        assert!(matches!(
            reason,
            ShutdownReason::ConsumerFailed(SubscriberError::InvalidState { .. })
        ));
        running.stop().await.unwrap();
    }
}
