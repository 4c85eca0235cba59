//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates graceful shutdown of the listener and every session.
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator that waits up to `timeout` for tasks to drain.
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Drain timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown starts, either through [`shutdown`](Self::shutdown)
    /// or ctrl-c.
    pub async fn signalled(&self) {
        tokio::select! {
            () = self.token.cancelled() => {}
            res = tokio::signal::ctrl_c() => {
                match res {
                    Ok(()) => info!("ctrl-c received"),
                    Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
                }
                self.shutdown();
            }
        }
    }

    /// Cancel the token, then wait up to the timeout for `handles`.
    ///
    /// Returns `false` when the timeout elapsed first.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>) -> bool {
        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(self.timeout, drain).await.is_err() {
            warn!("shutdown timed out after {:?}, some tasks may still be running", self.timeout);
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
