//! Shutdown on SIGTERM or SIGINT.
//!
//! One [`CancellationToken`] fans out to every long-running part of a server: axum's
//! graceful shutdown, the fulfillment poller and the bridge loop.
//!
//! ```ignore
//! let sig_down = SigDown::try_new()?;
//! let poller = tokio::spawn(poller.run(tx, sig_down.cancellation_token()));
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(sig_down.cancellation_token().cancelled_owned())
//!     .await?;
//! ```

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers. Fails if the runtime cannot install them.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let cancellation_token = CancellationToken::new();
        let inner = cancellation_token.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
                _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
                _ = inner.cancelled() => {}
            }
            inner.cancel();
        });
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Triggers shutdown without a signal.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Waits for shutdown and for the signal task to finish.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
