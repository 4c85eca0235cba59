//! Shared state handed to every session and stateless request.

use std::sync::Arc;

use duplex_container::Container;
use duplex_settings::Settings;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

use crate::events::EventRegistry;
use crate::http::ErrorMiddleware;
use crate::shutdown::ShutdownCoordinator;
use crate::task_pool::TaskPool;
use crate::websocket::Connections;

/// Process-level startup progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built but not listening.
    Unstarted,
    /// `managerStart` is being dispatched.
    ManagerStarting,
    /// `start` has fired and connections are accepted.
    Started,
}

/// Everything the server shares across tasks.
///
/// Built once by [`Server::build`](crate::Server::build) and passed around as
/// `Arc<AppContext>`. Read-only apart from the connection table and the
/// lifecycle state.
pub struct AppContext {
    settings: Arc<Settings>,
    container: Arc<Container>,
    events: Arc<EventRegistry>,
    errors: Arc<ErrorMiddleware>,
    connections: Connections,
    shutdown: ShutdownCoordinator,
    sessions: TaskTracker,
    limits: Arc<Semaphore>,
    lifecycle: Mutex<LifecycleState>,
}

impl AppContext {
    pub(crate) fn new(
        settings: Arc<Settings>,
        container: Arc<Container>,
        events: EventRegistry,
        errors: ErrorMiddleware,
    ) -> Self {
        let options = &settings.server.options;
        let connections = Connections::new(TaskPool::new(options.task_worker_num));
        let shutdown =
            ShutdownCoordinator::new(std::time::Duration::from_secs(options.shutdown_timeout));
        let limits = options.max_connection.min(Semaphore::MAX_PERMITS);
        let limits = Arc::new(Semaphore::new(limits));
        Self {
            settings,
            container,
            events: Arc::new(events),
            errors: Arc::new(errors),
            connections,
            shutdown,
            sessions: TaskTracker::new(),
            limits,
            lifecycle: Mutex::new(LifecycleState::Unstarted),
        }
    }

    /// Validated settings.
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// The dependency container.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Event bindings.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Error middleware wrapping the router.
    pub fn errors(&self) -> &Arc<ErrorMiddleware> {
        &self.errors
    }

    /// Live connection table.
    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Pool for blocking work.
    pub fn task_pool(&self) -> &TaskPool {
        self.connections.task_pool()
    }

    /// Current startup progress.
    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    /// Move from `from` to `to`. Returns `false` if the state was not `from`.
    pub(crate) fn advance(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let mut state = self.lifecycle.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// A session slot, or `None` at `max_connection`.
    pub(crate) fn try_acquire_session(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.limits).try_acquire_owned().ok()
    }

    /// Free session slots.
    pub fn available_sessions(&self) -> usize {
        self.limits.available_permits()
    }

    pub(crate) fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("bind_addr", &self.settings.bind_addr())
            .field("events", &self.events)
            .field("connections", &self.connections.len())
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
