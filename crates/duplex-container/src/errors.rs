//! Container error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while registering, resolving, or caching definitions.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// No definition is registered for the requested key.
    #[error("unresolvable dependency `{key}`")]
    Unresolvable {
        /// The key that had no definition.
        key: String,
    },
    /// A definition depends on itself, directly or transitively.
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle {
        /// Keys from the first occurrence back to the repeated one.
        path: Vec<String>,
    },
    /// A factory returned an error.
    #[error("failed to construct `{key}`: {source}")]
    Construction {
        /// The key whose factory failed.
        key: String,
        /// The factory's error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Reading or writing a cache artifact failed.
    #[error("resolution cache I/O at {}: {source}", .path.display())]
    CacheIo {
        /// The artifact path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A cache artifact could not be (de)serialized.
    #[error("resolution cache format: {0}")]
    CacheFormat(#[from] serde_json::Error),
    /// A lazy proxy outlived its container.
    #[error("container dropped before lazy `{key}` was resolved")]
    Dropped {
        /// The proxied key.
        key: String,
    },
}

impl ContainerError {
    /// Wrap a factory failure for `key`.
    pub fn construction(
        key: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Construction {
            key: key.into(),
            source: source.into(),
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_display() {
        let err = ContainerError::Unresolvable { key: "app::Db".into() };
        assert_eq!(err.to_string(), "unresolvable dependency `app::Db`");
    }

    #[test]
    fn cycle_display_joins_path() {
        let err = ContainerError::Cycle {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: A -> B -> A");
    }

    #[test]
    fn construction_keeps_source() {
        let err = ContainerError::construction("app::Db", "connection refused");
        assert!(err.to_string().contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
