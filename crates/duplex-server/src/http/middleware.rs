//! Ordered middleware around a terminal handler.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::HandlerError;
use super::message::{HttpRequest, HttpResponse};
use super::router::RouteHandler;

/// Wraps request handling; call `next.run(req)` to continue the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle `req`, optionally delegating to the rest of the chain.
    async fn handle(&self, req: HttpRequest, next: Next<'_>) -> Result<HttpResponse, HandlerError>;
}

/// The remainder of a middleware chain.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn RouteHandler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        middleware: &'a [Arc<dyn Middleware>],
        endpoint: &'a dyn RouteHandler,
    ) -> Self {
        Self {
            middleware,
            endpoint,
        }
    }

    /// Run the next middleware, or the endpoint when none remain.
    pub async fn run(self, req: HttpRequest) -> Result<HttpResponse, HandlerError> {
        match self.middleware.split_first() {
            Some((first, rest)) => first.handle(req, Next::new(rest, self.endpoint)).await,
            None => self.endpoint.call(req).await,
        }
    }
}
