//! Settings schema: network, application, and cache sections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level settings, immutable once the server is built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Network bind parameters and transport tuning.
    pub server: ServerSettings,
    /// Application flags.
    pub app: AppSettings,
    /// Filesystem locations for cached container artifacts.
    pub cache: CacheSettings,
}

impl Settings {
    /// `host:port` suitable for [`std::net::SocketAddr`] parsing.
    ///
    /// IPv6 literals are wrapped in brackets.
    pub fn bind_addr(&self) -> String {
        let host = &self.server.host;
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", self.server.port)
        } else {
            format!("{host}:{}", self.server.port)
        }
    }
}

/// How the server schedules its workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Everything on a single event loop thread.
    Base,
    /// `worker_num` loop threads sharing the listener.
    #[default]
    Process,
}

/// Socket family of the listener.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SockType {
    /// IPv4 (or hostname) TCP.
    #[default]
    Tcp,
    /// IPv6 TCP.
    Tcp6,
}

/// Server network settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks an ephemeral port).
    pub port: u16,
    /// Worker scheduling mode.
    pub mode: ServerMode,
    /// Socket family.
    pub sock_type: SockType,
    /// Transport tuning.
    pub options: ServerOptions,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9502,
            mode: ServerMode::default(),
            sock_type: SockType::default(),
            options: ServerOptions::default(),
        }
    }
}

/// Transport tuning options.
///
/// Durations are in whole seconds, matching the settings file format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Event loop worker threads (`process` mode only).
    pub worker_num: usize,
    /// Maximum concurrently running offloaded tasks.
    pub task_worker_num: usize,
    /// Maximum concurrent persistent connections.
    pub max_connection: usize,
    /// Maximum request body or inbound frame size in bytes.
    pub package_max_length: usize,
    /// Interval between server pings.
    pub heartbeat_check_interval: u64,
    /// Close a persistent connection after this long without traffic.
    pub heartbeat_idle_time: u64,
    /// Outbound frames buffered per connection before dropping.
    pub send_queue_size: usize,
    /// Upper bound for a single stateless request.
    pub request_timeout: u64,
    /// How long shutdown waits for sessions to drain.
    pub shutdown_timeout: u64,
    /// Only upgrade requests on this path (any path when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_path: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            worker_num: std::thread::available_parallelism().map_or(1, std::num::NonZero::get),
            task_worker_num: 4,
            max_connection: 10_000,
            package_max_length: 2 * 1024 * 1024, // 2 MiB
            heartbeat_check_interval: 30,
            heartbeat_idle_time: 90,
            send_queue_size: 1024,
            request_timeout: 60,
            shutdown_timeout: 30,
            websocket_path: None,
        }
    }
}

/// Application flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Application name used in logs.
    pub name: String,
    /// Render verbose error bodies.
    pub debug: bool,
    /// Cache the container resolution plan on disk.
    pub cache: bool,
    /// Force every error response to this content type (empty disables).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_content_type: Option<String>,
    /// Log handler failures.
    pub log_errors: bool,
    /// Include the error source chain in failure logs.
    pub log_error_details: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "duplex".to_string(),
            debug: false,
            cache: false,
            error_content_type: Some("text/html".to_string()),
            log_errors: true,
            log_error_details: true,
        }
    }
}

/// Cache artifact locations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory holding the compiled resolution plan.
    pub compilation: PathBuf,
    /// Directory holding the proxy manifest.
    pub proxies: PathBuf,
}
