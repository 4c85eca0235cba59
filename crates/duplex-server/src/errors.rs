//! Server-level errors.

use duplex_container::ContainerError;
use duplex_settings::ConfigurationError;
use thiserror::Error;

use crate::events::{EventKind, EventRegistrationError, ReactorError};

/// Everything that stops the server from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Settings were missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigurationError),

    /// A dependency could not be constructed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// An event binding was rejected.
    #[error(transparent)]
    Registration(#[from] EventRegistrationError),

    /// A lifecycle reactor failed while the server was starting.
    #[error("{event} reactor failed during startup")]
    Lifecycle {
        /// `managerStart` or `start`.
        event: EventKind,
        /// The reactor failure.
        #[source]
        source: ReactorError,
    },

    /// The listener could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address from the settings.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `listen` was called more than once.
    #[error("server already started")]
    AlreadyStarted,

    /// Other I/O failure while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServerError>;
