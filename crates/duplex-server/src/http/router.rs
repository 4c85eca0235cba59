//! Reference dispatcher: method + path routing with `{param}` segments.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use tracing::debug;

use super::error::HandlerError;
use super::message::{HttpRequest, HttpResponse};
use super::middleware::{Middleware, Next};

/// Turns a request into a response; failures are rendered by the caller.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Produce the response for `req`.
    async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse, HandlerError>;
}

/// Terminal handler for one route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle a matched request.
    async fn call(&self, req: HttpRequest) -> Result<HttpResponse, HandlerError>;
}

/// Adapter from a closure to [`RouteHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`RouteHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, HandlerError>> + Send + 'static,
{
    async fn call(&self, req: HttpRequest) -> Result<HttpResponse, HandlerError> {
        (self.0)(req).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route pattern such as `/users/{id}/posts`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse `pattern`. Empty segments are ignored, so `/a//b/` equals `/a/b`.
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Captured parameters if `path` matches.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push((name.clone(), part.to_string())),
            }
        }
        Some(params)
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Arc<dyn RouteHandler>,
}

#[derive(Default)]
struct RouteTable {
    routes: Vec<Route>,
}

#[async_trait]
impl RouteHandler for RouteTable {
    async fn call(&self, mut req: HttpRequest) -> Result<HttpResponse, HandlerError> {
        let mut allowed = Vec::new();
        for route in &self.routes {
            let Some(params) = route.pattern.matches(req.path()) else {
                continue;
            };
            if route.method == req.method {
                debug!(method = %req.method, pattern = route.pattern.as_str(), "route matched");
                req.params = params.into_iter().collect();
                return route.handler.call(req).await;
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }
        if allowed.is_empty() {
            Err(HandlerError::NotFound {
                method: req.method.clone(),
                path: req.path().to_string(),
            })
        } else {
            Err(HandlerError::MethodNotAllowed { allowed })
        }
    }
}

/// Routes requests by method and path, through ordered middleware.
///
/// Routes are tried in registration order. Middleware wraps routing as a
/// whole, so it also sees requests that end up as 404 or 405.
#[derive(Default)]
pub struct Router {
    table: RouteTable,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Router {
    /// Router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl RouteHandler + 'static,
    ) -> &mut Self {
        self.table.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler: Arc::new(handler),
        });
        self
    }

    /// Add a `GET` route.
    pub fn get(&mut self, pattern: &str, handler: impl RouteHandler + 'static) -> &mut Self {
        self.route(Method::GET, pattern, handler)
    }

    /// Add a `POST` route.
    pub fn post(&mut self, pattern: &str, handler: impl RouteHandler + 'static) -> &mut Self {
        self.route(Method::POST, pattern, handler)
    }

    /// Add a `PUT` route.
    pub fn put(&mut self, pattern: &str, handler: impl RouteHandler + 'static) -> &mut Self {
        self.route(Method::PUT, pattern, handler)
    }

    /// Add a `DELETE` route.
    pub fn delete(&mut self, pattern: &str, handler: impl RouteHandler + 'static) -> &mut Self {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Append middleware. The first added runs outermost.
    pub fn layer(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.table.routes.len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.table.routes.is_empty()
    }
}

#[async_trait]
impl Dispatcher for Router {
    async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse, HandlerError> {
        Next::new(&self.middleware, &self.table).run(req).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::StatusCode;

    use super::*;

    fn ok(body: &'static str) -> impl RouteHandler {
        handler_fn(move |_req| async move { Ok(HttpResponse::text(StatusCode::OK, body)) })
    }

    fn router() -> Router {
        let mut router = Router::new();
        router
            .get("/health", ok("ok"))
            .post("/health", ok("posted"))
            .get(
                "/users/{id}",
                handler_fn(|req: HttpRequest| async move {
                    let id = req.param("id").unwrap_or_default().to_string();
                    Ok(HttpResponse::text(StatusCode::OK, id))
                }),
            )
            .get("/", ok("root"));
        router
    }

    fn body(resp: &HttpResponse) -> &[u8] {
        resp.body().as_bytes().unwrap()
    }

    #[test]
    fn pattern_matching() {
        let pattern = Pattern::parse("/users/{id}/posts/{post}");
        assert_eq!(
            pattern.matches("/users/7/posts/42"),
            Some(vec![("id".into(), "7".into()), ("post".into(), "42".into())])
        );
        assert_eq!(pattern.matches("/users/7/posts"), None);
        assert_eq!(pattern.matches("/people/7/posts/42"), None);
        assert_eq!(Pattern::parse("/").matches("/"), Some(vec![]));
        assert_eq!(Pattern::parse("/health").matches("/health/"), Some(vec![]));
    }

    #[tokio::test]
    async fn matches_method_and_path() {
        let router = router();
        let resp = router.dispatch(HttpRequest::new(Method::GET, "/health")).await.unwrap();
        assert_eq!(body(&resp), b"ok");
        let resp = router.dispatch(HttpRequest::new(Method::POST, "/health")).await.unwrap();
        assert_eq!(body(&resp), b"posted");
    }

    #[tokio::test]
    async fn query_is_ignored_for_matching() {
        let resp = router()
            .dispatch(HttpRequest::new(Method::GET, "/health?verbose=1"))
            .await
            .unwrap();
        assert_eq!(body(&resp), b"ok");
    }

    #[tokio::test]
    async fn captures_params() {
        let resp = router()
            .dispatch(HttpRequest::new(Method::GET, "/users/ada"))
            .await
            .unwrap();
        assert_eq!(body(&resp), b"ada");
    }

    #[tokio::test]
    async fn unmatched_path_is_not_found() {
        let err = router()
            .dispatch(HttpRequest::new(Method::GET, "/missing"))
            .await
            .unwrap_err();
        assert_matches!(err, HandlerError::NotFound { ref path, .. } if path == "/missing");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_lists_allowed() {
        let err = router()
            .dispatch(HttpRequest::new(Method::DELETE, "/health"))
            .await
            .unwrap_err();
        assert_matches!(err, HandlerError::MethodNotAllowed { allowed } => {
            assert_eq!(allowed, vec![Method::GET, Method::POST]);
        });
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let mut router = Router::new();
        router.get(
            "/fail",
            handler_fn(|_req| async { Err(HandlerError::Internal(anyhow::anyhow!("db down"))) }),
        );
        let err = router
            .dispatch(HttpRequest::new(Method::GET, "/fail"))
            .await
            .unwrap_err();
        assert_matches!(err, HandlerError::Internal(_));
    }

    #[test]
    fn counts_routes() {
        assert_eq!(router().len(), 4);
        assert!(Router::new().is_empty());
    }
}
