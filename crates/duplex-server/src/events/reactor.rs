//! Reactor capability traits and the tagged handler unit.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use super::kind::Capability;
use crate::websocket::{ConnectionId, Connections, Frame};

/// Reacts to `managerStart` / `start`.
#[async_trait]
pub trait LifecycleReactor: Send + Sync {
    /// Run once when the event fires.
    async fn handle(&self) -> anyhow::Result<()>;
}

/// Reacts to `open` / `close` of a WebSocket connection.
#[async_trait]
pub trait ConnectionReactor: Send + Sync {
    /// Handle the connection event for `id`.
    async fn handle(&self, connections: &Connections, id: ConnectionId) -> anyhow::Result<()>;
}

/// Reacts to every inbound WebSocket frame.
///
/// Calls for one connection never overlap and arrive in frame order.
#[async_trait]
pub trait MessageReactor: Send + Sync {
    /// Handle `frame` received on `id`.
    async fn handle(
        &self,
        connections: &Connections,
        id: ConnectionId,
        frame: Frame,
    ) -> anyhow::Result<()>;
}

/// Observes stateless requests after their response has been produced.
#[async_trait]
pub trait RequestObserver: Send + Sync {
    /// Inspect the finished request.
    async fn observe(&self, summary: &RequestSummary) -> anyhow::Result<()>;
}

/// What the core reports to a [`RequestObserver`].
#[derive(Clone, Debug)]
pub struct RequestSummary {
    /// Request method.
    pub method: Method,
    /// Path and query as received.
    pub target: String,
    /// Status that was sent.
    pub status: StatusCode,
    /// Time from accept to response.
    pub elapsed: Duration,
    /// Remote address, when known.
    pub peer: Option<SocketAddr>,
}

/// One handler instance tagged with its capability.
#[derive(Clone)]
pub enum HandlerUnit {
    /// See [`LifecycleReactor`].
    Lifecycle(Arc<dyn LifecycleReactor>),
    /// See [`ConnectionReactor`].
    Connection(Arc<dyn ConnectionReactor>),
    /// See [`MessageReactor`].
    Message(Arc<dyn MessageReactor>),
    /// See [`RequestObserver`].
    Request(Arc<dyn RequestObserver>),
}

impl HandlerUnit {
    /// Wrap a lifecycle reactor.
    pub fn lifecycle(reactor: impl LifecycleReactor + 'static) -> Self {
        Self::Lifecycle(Arc::new(reactor))
    }

    /// Wrap a connection reactor.
    pub fn connection(reactor: impl ConnectionReactor + 'static) -> Self {
        Self::Connection(Arc::new(reactor))
    }

    /// Wrap a message reactor.
    pub fn message(reactor: impl MessageReactor + 'static) -> Self {
        Self::Message(Arc::new(reactor))
    }

    /// Wrap a request observer.
    pub fn request(observer: impl RequestObserver + 'static) -> Self {
        Self::Request(Arc::new(observer))
    }

    /// The capability this unit provides.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Lifecycle(_) => Capability::Lifecycle,
            Self::Connection(_) => Capability::Connection,
            Self::Message(_) => Capability::Message,
            Self::Request(_) => Capability::Request,
        }
    }
}

impl fmt::Debug for HandlerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerUnit").field(&self.capability()).finish()
    }
}
