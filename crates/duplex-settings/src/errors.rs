//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
///
/// Every variant is fatal: the server refuses to bind a listener until the
/// settings load cleanly.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The raw settings were absent, `null`, or an empty object.
    #[error("settings not found")]
    Empty,
    /// A required key was missing from the raw settings.
    #[error("missing required setting `{0}`")]
    MissingKey(&'static str),
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON settings.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to parse TOML settings.
    #[error("failed to parse settings TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// The settings file extension is not one we know how to parse.
    #[error("unsupported settings format: {0}")]
    UnsupportedFormat(String),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, ConfigurationError>;
