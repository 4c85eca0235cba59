//! Stateless routes served next to the chat sessions.

use axum::http::StatusCode;
use duplex_server::http::{HttpResponse, Router, handler_fn};

/// GET /health
pub fn register(router: &mut Router) {
    let _ = router.get(
        "/health",
        handler_fn(|_req| async { Ok(HttpResponse::text(StatusCode::OK, "ok")) }),
    );
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use duplex_server::http::{Dispatcher, HttpRequest};

    use super::*;

    #[tokio::test]
    async fn health_is_ok() {
        let mut router = Router::new();
        register(&mut router);
        let resp = router
            .dispatch(HttpRequest::new(Method::GET, "/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_bytes().unwrap().as_ref(), b"ok");
    }
}
