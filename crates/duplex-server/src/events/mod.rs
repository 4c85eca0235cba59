//! Named lifecycle events and the registry binding them to handler units.

pub mod kind;
pub mod reactor;
pub mod registry;

pub use kind::{Capability, EventKind, UnknownEvent};
pub use reactor::{
    ConnectionReactor, HandlerUnit, LifecycleReactor, MessageReactor, RequestObserver,
    RequestSummary,
};
pub use registry::{Event, EventRegistrationError, EventRegistry, ReactorError};
