//! Event names and the capability each one requires.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A server lifecycle event a handler can be bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Fired once before the first `start`.
    ManagerStart,
    /// Fired once before the listener accepts.
    Start,
    /// A WebSocket connection was established.
    Open,
    /// A WebSocket frame arrived.
    Message,
    /// A stateless request was answered.
    Request,
    /// A WebSocket connection ended.
    Close,
}

impl EventKind {
    /// All events, in firing order for a single connection's lifetime.
    pub const ALL: [EventKind; 6] = [
        EventKind::ManagerStart,
        EventKind::Start,
        EventKind::Open,
        EventKind::Message,
        EventKind::Request,
        EventKind::Close,
    ];

    /// Wire name, as used in event bindings.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ManagerStart => "managerStart",
            EventKind::Start => "start",
            EventKind::Open => "open",
            EventKind::Message => "message",
            EventKind::Request => "request",
            EventKind::Close => "close",
        }
    }

    /// The handler capability this event dispatches to.
    pub fn capability(self) -> Capability {
        match self {
            EventKind::ManagerStart | EventKind::Start => Capability::Lifecycle,
            EventKind::Open | EventKind::Close => Capability::Connection,
            EventKind::Message => Capability::Message,
            EventKind::Request => Capability::Request,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl fmt::Display for UnknownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event `{}`", self.0)
    }
}

impl std::error::Error for UnknownEvent {}

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// What a handler unit can react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// No arguments: `managerStart`, `start`.
    Lifecycle,
    /// Connection id: `open`, `close`.
    Connection,
    /// Connection id and frame: `message`.
    Message,
    /// Summary of an answered request: `request`.
    Request,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Lifecycle => "lifecycle",
            Capability::Connection => "connection",
            Capability::Message => "message",
            Capability::Request => "request",
        })
    }
}
