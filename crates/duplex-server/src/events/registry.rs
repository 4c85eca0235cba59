//! Event registry: one handler unit per event, dispatched by tag.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use duplex_container::{Container, ContainerError};
use futures::FutureExt;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::kind::{Capability, EventKind};
use super::reactor::{HandlerUnit, RequestSummary};
use crate::metrics::REACTOR_ERRORS_TOTAL;
use crate::websocket::{ConnectionId, Connections, Frame};

/// Why a binding was rejected.
#[derive(Debug, Error)]
pub enum EventRegistrationError {
    /// The binding set was empty.
    #[error("there are no events to register")]
    Empty,
    /// The event name is not one of the six known events.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    /// No handler unit is registered under this id.
    #[error("event handler `{handler}` not found")]
    UnknownHandler {
        /// The handler id.
        handler: String,
    },
    /// The handler unit cannot react to this event.
    #[error("handler `{handler}` is a {found} unit but `{event}` needs a {expected} unit")]
    CapabilityMismatch {
        /// The event being bound.
        event: EventKind,
        /// The handler id.
        handler: String,
        /// Capability the event needs.
        expected: Capability,
        /// Capability the handler provides.
        found: Capability,
    },
    /// The event already has a handler.
    #[error("event `{event}` is already bound to `{handler}`")]
    AlreadyBound {
        /// The event.
        event: EventKind,
        /// The handler currently bound.
        handler: String,
    },
    /// The handler unit exists but could not be constructed.
    #[error("failed to construct handler `{handler}`: {source}")]
    Construction {
        /// The handler id.
        handler: String,
        /// The container error.
        #[source]
        source: ContainerError,
    },
}

/// A reactor failure, contained to the event that raised it.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The reactor returned an error.
    #[error("`{handler}` failed on {event}: {source:#}")]
    Failed {
        /// The event being dispatched.
        event: EventKind,
        /// The handler id.
        handler: String,
        /// The reactor's error.
        #[source]
        source: anyhow::Error,
    },
    /// The reactor panicked.
    #[error("`{handler}` panicked on {event}: {message}")]
    Panicked {
        /// The event being dispatched.
        event: EventKind,
        /// The handler id.
        handler: String,
        /// The panic payload, when it was a string.
        message: String,
    },
}

impl ReactorError {
    /// The event whose reactor failed.
    pub fn event(&self) -> EventKind {
        match self {
            Self::Failed { event, .. } | Self::Panicked { event, .. } => *event,
        }
    }
}

/// Log and count a contained reactor failure.
pub(crate) fn report(err: &ReactorError) {
    let event = err.event().as_str();
    warn!(error = %err, event, "reactor failed");
    counter!(REACTOR_ERRORS_TOTAL, "event" => event).increment(1);
}

/// An event occurrence with its arguments.
#[derive(Debug)]
pub enum Event<'a> {
    /// `managerStart`.
    ManagerStart,
    /// `start`.
    Start,
    /// `open`.
    Open(&'a Connections, ConnectionId),
    /// `message`.
    Message(&'a Connections, ConnectionId, Frame),
    /// `request`.
    Request(&'a RequestSummary),
    /// `close`.
    Close(&'a Connections, ConnectionId),
}

impl Event<'_> {
    /// The event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ManagerStart => EventKind::ManagerStart,
            Event::Start => EventKind::Start,
            Event::Open(..) => EventKind::Open,
            Event::Message(..) => EventKind::Message,
            Event::Request(_) => EventKind::Request,
            Event::Close(..) => EventKind::Close,
        }
    }
}

#[derive(Clone)]
struct Binding {
    handler: String,
    unit: HandlerUnit,
}

/// Binds each event to exactly one handler unit.
///
/// Units are resolved once at registration and reused for every occurrence
/// of the event.
#[derive(Clone, Default)]
pub struct EventRegistry {
    bindings: HashMap<EventKind, Binding>,
}

impl EventRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every binding in `bindings`, or none of them.
    pub fn from_bindings<I, E, H>(
        bindings: I,
        container: &Container,
    ) -> Result<Self, EventRegistrationError>
    where
        I: IntoIterator<Item = (E, H)>,
        E: AsRef<str>,
        H: AsRef<str>,
    {
        let mut registry = Self::new();
        registry.register_all(bindings, container)?;
        Ok(registry)
    }

    /// Bind `unit` to `event` under the id `handler`.
    pub fn bind(
        &mut self,
        event: EventKind,
        handler: impl Into<String>,
        unit: HandlerUnit,
    ) -> Result<(), EventRegistrationError> {
        let handler = handler.into();
        if let Some(existing) = self.bindings.get(&event) {
            return Err(EventRegistrationError::AlreadyBound {
                event,
                handler: existing.handler.clone(),
            });
        }
        let expected = event.capability();
        let found = unit.capability();
        if expected != found {
            return Err(EventRegistrationError::CapabilityMismatch {
                event,
                handler,
                expected,
                found,
            });
        }
        debug!(event = %event, handler = %handler, "[EVENT] bound");
        let _ = self.bindings.insert(event, Binding { handler, unit });
        Ok(())
    }

    /// Resolve the handler unit named `handler` and bind it to `event`.
    pub fn register(
        &mut self,
        event: &str,
        handler: &str,
        container: &Container,
    ) -> Result<(), EventRegistrationError> {
        let kind: EventKind = event
            .parse()
            .map_err(|_| EventRegistrationError::UnknownEvent(event.to_string()))?;
        let unit = resolve_unit(handler, container)?;
        self.bind(kind, handler, unit)
    }

    /// Register every binding, leaving the registry unchanged on any error.
    pub fn register_all<I, E, H>(
        &mut self,
        bindings: I,
        container: &Container,
    ) -> Result<(), EventRegistrationError>
    where
        I: IntoIterator<Item = (E, H)>,
        E: AsRef<str>,
        H: AsRef<str>,
    {
        let mut staged = self.clone();
        let mut count = 0_usize;
        for (event, handler) in bindings {
            staged.register(event.as_ref(), handler.as_ref(), container)?;
            count += 1;
        }
        if count == 0 {
            return Err(EventRegistrationError::Empty);
        }
        *self = staged;
        Ok(())
    }

    /// Whether `event` has a handler.
    pub fn is_bound(&self, event: EventKind) -> bool {
        self.bindings.contains_key(&event)
    }

    /// Id of the handler bound to `event`.
    pub fn handler_name(&self, event: EventKind) -> Option<&str> {
        self.bindings.get(&event).map(|b| b.handler.as_str())
    }

    /// Number of bound events.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Deliver `event` to its handler. Unbound events are a no-op.
    #[instrument(skip_all, fields(event = %event.kind()))]
    pub async fn dispatch(&self, event: Event<'_>) -> Result<(), ReactorError> {
        let kind = event.kind();
        let Some(binding) = self.bindings.get(&kind) else {
            return Ok(());
        };

        let call = async {
            match (&binding.unit, event) {
                (HandlerUnit::Lifecycle(r), Event::ManagerStart | Event::Start) => r.handle().await,
                (HandlerUnit::Connection(r), Event::Open(conns, id) | Event::Close(conns, id)) => {
                    r.handle(conns, id).await
                }
                (HandlerUnit::Message(r), Event::Message(conns, id, frame)) => {
                    r.handle(conns, id, frame).await
                }
                (HandlerUnit::Request(r), Event::Request(summary)) => r.observe(summary).await,
                // `bind` rejects mismatched capabilities.
                _ => Ok(()),
            }
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ReactorError::Failed {
                event: kind,
                handler: binding.handler.clone(),
                source,
            }),
            Err(payload) => Err(ReactorError::Panicked {
                event: kind,
                handler: binding.handler.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            if let Some(b) = self.bindings.get(&kind) {
                let _ = map.entry(&kind.as_str(), &b.handler);
            }
        }
        map.finish()
    }
}

fn resolve_unit(
    handler: &str,
    container: &Container,
) -> Result<HandlerUnit, EventRegistrationError> {
    match container.resolve_named::<HandlerUnit>(handler) {
        Ok(unit) => Ok((*unit).clone()),
        Err(ContainerError::Unresolvable { key }) if key.ends_with(&format!("#{handler}")) => {
            Err(EventRegistrationError::UnknownHandler {
                handler: handler.to_string(),
            })
        }
        Err(source) => Err(EventRegistrationError::Construction {
            handler: handler.to_string(),
            source,
        }),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
