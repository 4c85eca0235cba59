//! Bounded pool for blocking work offloaded by reactors.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

/// Why an offloaded task produced no result.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The pool was closed during shutdown.
    #[error("task pool is closed")]
    Closed,
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was cancelled before completing.
    #[error("task cancelled")]
    Cancelled,
}

/// Runs blocking closures with at most `size` in flight.
///
/// Extra submissions wait for a slot instead of spawning more threads.
#[derive(Clone, Debug)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl TaskPool {
    /// Pool with `size` slots, clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Configured slot count.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on the blocking thread pool once a slot is free.
    pub async fn run<F, T>(&self, task: F) -> Result<T, TaskError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TaskError::Closed)?;
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        });
        match handle.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => {
                let message = crate::events::registry::panic_message(e.into_panic().as_ref());
                warn!(%message, "offloaded task panicked");
                Err(TaskError::Panicked(message))
            }
            Err(_) => Err(TaskError::Cancelled),
        }
    }

    /// Refuse new work; queued submissions fail with [`TaskError::Closed`].
    pub fn close(&self) {
        self.permits.close();
    }
}
