//! Stateless request path: protocol messages, routing, and error rendering.

pub mod error;
pub mod error_middleware;
pub mod message;
pub mod middleware;
pub mod negotiate;
pub mod render;
pub mod router;

pub use error::HandlerError;
pub use error_middleware::{ErrorMiddleware, ErrorOptions};
pub use message::{HttpRequest, HttpResponse, ResponseBody};
pub use middleware::{Middleware, Next};
pub use render::{ErrorDetails, ErrorRenderer, RendererRegistry};
pub use router::{Dispatcher, RouteHandler, Router, handler_fn};
