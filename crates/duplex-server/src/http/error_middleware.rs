//! Turns every dispatcher failure into a rendered response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{ACCEPT, ALLOW, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use duplex_settings::Settings;
use futures::FutureExt;
use tracing::{error, warn};

use super::error::HandlerError;
use super::message::{HttpRequest, HttpResponse};
use super::negotiate::{join_accept, negotiate};
use super::render::{ErrorDetails, RendererRegistry};
use super::router::Dispatcher;
use crate::events::registry::panic_message;

/// How errors are shown and logged.
#[derive(Clone, Debug)]
pub struct ErrorOptions {
    /// Include kind, message, sources, and request line in bodies.
    pub display_details: bool,
    /// Log every failure.
    pub log_errors: bool,
    /// Add the source chain to log lines.
    pub log_error_details: bool,
    /// Always render this media type, ignoring `Accept`.
    pub forced_content_type: Option<String>,
    /// Media type used when negotiation is inconclusive.
    pub default_content_type: String,
    /// Upper bound on one dispatch.
    pub timeout: Duration,
}

impl Default for ErrorOptions {
    fn default() -> Self {
        Self {
            display_details: false,
            log_errors: true,
            log_error_details: true,
            forced_content_type: Some("text/html".into()),
            default_content_type: "text/html".into(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ErrorOptions {
    /// Options from `app.*` and `server.options.request_timeout`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            display_details: settings.app.debug,
            log_errors: settings.app.log_errors,
            log_error_details: settings.app.log_error_details,
            forced_content_type: settings
                .app
                .error_content_type
                .clone()
                .filter(|ct| !ct.trim().is_empty()),
            default_content_type: "text/html".into(),
            timeout: Duration::from_secs(settings.server.options.request_timeout),
        }
    }
}

/// Wraps a [`Dispatcher`] so that handling always yields a response.
pub struct ErrorMiddleware {
    inner: Arc<dyn Dispatcher>,
    renderers: RendererRegistry,
    options: ErrorOptions,
}

impl ErrorMiddleware {
    /// Wrap `inner` with the default renderers.
    pub fn new(inner: Arc<dyn Dispatcher>, options: ErrorOptions) -> Self {
        Self {
            inner,
            renderers: RendererRegistry::with_defaults(),
            options,
        }
    }

    /// Replace the renderer set.
    #[must_use]
    pub fn with_renderers(mut self, renderers: RendererRegistry) -> Self {
        self.renderers = renderers;
        self
    }

    /// Active options.
    pub fn options(&self) -> &ErrorOptions {
        &self.options
    }

    /// Dispatch `req`; failures, panics, and timeouts become error pages.
    pub async fn handle(&self, req: HttpRequest) -> HttpResponse {
        let method = req.method().clone();
        let target = req.target().to_string();
        let accept = join_accept(req.header_all(&ACCEPT));

        let call = AssertUnwindSafe(self.inner.dispatch(req)).catch_unwind();
        let err = match tokio::time::timeout(self.options.timeout, call).await {
            Ok(Ok(Ok(response))) => return response,
            Ok(Ok(Err(err))) => err,
            Ok(Err(payload)) => HandlerError::Panicked(panic_message(payload.as_ref())),
            Err(_) => HandlerError::Timeout(self.options.timeout),
        };
        self.render_error(&err, &method, &target, accept.as_deref())
    }

    /// Log `err` and render it for a client that sent `accept`.
    pub fn render_error(
        &self,
        err: &HandlerError,
        method: &Method,
        target: &str,
        accept: Option<&str>,
    ) -> HttpResponse {
        let status = err.status();
        let chain = err.chain();
        self.log(err, method, target, &chain);

        let details = ErrorDetails {
            status,
            kind: err.kind(),
            chain,
            method: method.to_string(),
            target: target.to_string(),
        };

        let renderer = self
            .options
            .forced_content_type
            .as_deref()
            .and_then(|ct| self.renderers.get(ct))
            .or_else(|| {
                let supported = self.renderers.media_types();
                negotiate(accept, &supported).and_then(|ct| self.renderers.get(ct))
            })
            .or_else(|| self.renderers.get(&self.options.default_content_type));

        let mut response = match renderer {
            Some(renderer) => HttpResponse::new(status)
                .with_header(CONTENT_TYPE, HeaderValue::from_static(renderer.content_type()))
                .with_body(renderer.render(&details, self.options.display_details)),
            None => HttpResponse::text(status, details.title()),
        };

        if let HandlerError::MethodNotAllowed { allowed } = err {
            let list = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
            if let Ok(value) = HeaderValue::from_str(&list) {
                response = response.with_header(ALLOW, value);
            }
        }
        response
    }

    fn log(&self, err: &HandlerError, method: &Method, target: &str, chain: &[String]) {
        if !self.options.log_errors {
            return;
        }
        let status = err.status().as_u16();
        let kind = err.kind();
        let detail = chain.join(": ");
        match (err.status().is_server_error(), self.options.log_error_details) {
            (true, true) => error!(status, kind, %method, uri = target, %detail, "request failed"),
            (true, false) => error!(status, kind, %method, uri = target, "request failed"),
            (false, true) => {
                warn!(status, kind, %method, uri = target, %detail, "request rejected");
            }
            (false, false) => warn!(status, kind, %method, uri = target, "request rejected"),
        }
    }
}

impl std::fmt::Debug for ErrorMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorMiddleware")
            .field("renderers", &self.renderers)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
