//! # duplex-server
//!
//! Single-port server core for real-time chat applications.
//!
//! - One listener: `Upgrade: websocket` requests become sessions, everything
//!   else takes the stateless path
//! - Sessions fire `open`, `message` per frame, and `close`, in order
//! - Stateless path: bridge, error middleware around the router, bridge
//! - Events bind to handler units resolved from the dependency container
//! - Graceful shutdown via `CancellationToken`
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use duplex_container::ContainerBuilder;
//! use duplex_server::http::{HttpResponse, handler_fn};
//! use duplex_server::Server;
//!
//! # async fn boot(settings: Arc<duplex_settings::Settings>) -> anyhow::Result<()> {
//! let container = ContainerBuilder::from_settings(Arc::clone(&settings)).build()?;
//! let server = Server::build(
//!     settings,
//!     container,
//!     Box::new(|router| {
//!         router.get("/health", handler_fn(|_req| async {
//!             Ok(HttpResponse::text(axum::http::StatusCode::OK, "ok"))
//!         }));
//!     }),
//!     vec![("open".into(), "chat".into())],
//! )?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod bridge;
pub mod context;
pub mod errors;
pub mod events;
pub mod http;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod task_pool;
pub mod websocket;

pub use context::{AppContext, LifecycleState};
pub use errors::{Result, ServerError};
pub use server::{EventBindings, RouteRegistrar, Server};
pub use shutdown::ShutdownCoordinator;
pub use task_pool::{TaskError, TaskPool};
pub use websocket::{Connection, ConnectionId, Connections, Frame};
