//! # duplex-settings
//!
//! Validated configuration for the duplex server.
//!
//! Settings come from a raw JSON/TOML value (usually a file) deep-merged over
//! compiled defaults. `server.host` and `server.port` are required; an empty
//! input is a fatal [`ConfigurationError`]. File loading additionally applies
//! `DUPLEX_*` environment overrides.
//!
//! # Usage
//!
//! ```no_run
//! use duplex_settings::load;
//!
//! let settings = load(serde_json::json!({
//!     "server": {"host": "0.0.0.0", "port": 9502},
//!     "app": {"debug": false},
//! }))?;
//! println!("binding {}", settings.bind_addr());
//! # Ok::<(), duplex_settings::ConfigurationError>(())
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{ConfigurationError, Result};
pub use loader::{MAX_PERMITS, deep_merge, load, load_from_path};
pub use types::*;
