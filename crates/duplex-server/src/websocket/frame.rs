//! Application-level WebSocket frames.

use axum::extract::ws::Message;
use bytes::Bytes;

/// A data frame, as delivered to message reactors and pushed to clients.
///
/// Control frames (ping, pong, close) are handled by the session and never
/// surface here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Text frame from anything string-like.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// The text payload, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(t) => Some(Self::Text(t.to_string())),
            Message::Binary(b) => Some(Self::Binary(b)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    pub(crate) fn into_message(self) -> Message {
        match self {
            Self::Text(t) => Message::Text(t.into()),
            Self::Binary(b) => Message::Binary(b),
        }
    }
}
