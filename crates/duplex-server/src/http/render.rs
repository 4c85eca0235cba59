//! Error body renderers, one per media type.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

/// Everything a renderer may show about a failed request.
#[derive(Clone, Debug)]
pub struct ErrorDetails {
    /// Response status.
    pub status: StatusCode,
    /// Variant name, e.g. `not_found`.
    pub kind: &'static str,
    /// Error message followed by its sources.
    pub chain: Vec<String>,
    /// Request method.
    pub method: String,
    /// Request target.
    pub target: String,
}

impl ErrorDetails {
    /// Reason phrase for the status.
    pub fn title(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Error")
    }
}

/// Renders an error body for one media type.
pub trait ErrorRenderer: Send + Sync {
    /// `Content-Type` of the rendered body.
    fn content_type(&self) -> &'static str;

    /// Render `details`. Without `verbose`, only the title may be shown.
    fn render(&self, details: &ErrorDetails, verbose: bool) -> String;
}

/// `text/html` pages.
#[derive(Debug, Default)]
pub struct HtmlRenderer;

impl ErrorRenderer for HtmlRenderer {
    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }

    fn render(&self, details: &ErrorDetails, verbose: bool) -> String {
        let title = format!("{} {}", details.status.as_u16(), details.title());
        let mut body = String::new();
        if verbose {
            let _ = write!(
                body,
                "<p>The application could not run because of the following error:</p>\
                 <h2>Details</h2>\
                 <div><strong>Type:</strong> {}</div>\
                 <div><strong>Request:</strong> {} {}</div>",
                escape_html(details.kind),
                escape_html(&details.method),
                escape_html(&details.target),
            );
            if let Some((message, sources)) = details.chain.split_first() {
                let _ = write!(
                    body,
                    "<div><strong>Message:</strong> {}</div>",
                    escape_html(message)
                );
                if !sources.is_empty() {
                    body.push_str("<h2>Caused by</h2><ol>");
                    for source in sources {
                        let _ = write!(body, "<li>{}</li>", escape_html(source));
                    }
                    body.push_str("</ol>");
                }
            }
        } else {
            body.push_str(
                "<p>A website error has occurred. Sorry for the temporary inconvenience.</p>",
            );
        }
        format!(
            "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
             <body><h1>{title}</h1>{body}</body></html>"
        )
    }
}

/// `application/json` documents.
#[derive(Debug, Default)]
pub struct JsonRenderer;

impl ErrorRenderer for JsonRenderer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, details: &ErrorDetails, verbose: bool) -> String {
        let value = if verbose {
            json!({
                "status": details.status.as_u16(),
                "message": details.title(),
                "error": {
                    "type": details.kind,
                    "message": details.chain.first(),
                    "causes": details.chain.get(1..).unwrap_or_default(),
                },
                "request": {
                    "method": details.method,
                    "target": details.target,
                },
            })
        } else {
            json!({
                "status": details.status.as_u16(),
                "message": details.title(),
            })
        };
        value.to_string()
    }
}

/// `text/plain` bodies.
#[derive(Debug, Default)]
pub struct PlainTextRenderer;

impl ErrorRenderer for PlainTextRenderer {
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn render(&self, details: &ErrorDetails, verbose: bool) -> String {
        let mut out = format!("{} {}", details.status.as_u16(), details.title());
        if verbose {
            let _ = write!(
                out,
                "\nType: {}\nRequest: {} {}",
                details.kind, details.method, details.target
            );
            for (depth, message) in details.chain.iter().enumerate() {
                if depth == 0 {
                    let _ = write!(out, "\nMessage: {message}");
                } else {
                    let _ = write!(out, "\nCaused by: {message}");
                }
            }
        }
        out
    }
}

/// Renderers keyed by media type.
#[derive(Clone)]
pub struct RendererRegistry {
    renderers: HashMap<String, Arc<dyn ErrorRenderer>>,
    order: Vec<String>,
}

impl RendererRegistry {
    /// HTML, JSON, and plain text, in that order of preference.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            renderers: HashMap::new(),
            order: Vec::new(),
        };
        registry.register("text/html", HtmlRenderer);
        registry.register("application/json", JsonRenderer);
        registry.register("text/plain", PlainTextRenderer);
        registry
    }

    /// Add or replace the renderer for `media_type`.
    pub fn register(&mut self, media_type: &str, renderer: impl ErrorRenderer + 'static) {
        let key = media_type.to_ascii_lowercase();
        if !self.order.contains(&key) {
            self.order.push(key.clone());
        }
        let _ = self.renderers.insert(key, Arc::new(renderer));
    }

    /// Renderer for `media_type`, ignoring parameters and case.
    pub fn get(&self, media_type: &str) -> Option<&Arc<dyn ErrorRenderer>> {
        let essence = media_type.split(';').next().unwrap_or_default().trim();
        self.renderers.get(&essence.to_ascii_lowercase())
    }

    /// Registered media types, in preference order.
    pub fn media_types(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererRegistry")
            .field("media_types", &self.order)
            .finish()
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> ErrorDetails {
        ErrorDetails {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            chain: vec!["loading <profile>".into(), "connection refused".into()],
            method: "GET".into(),
            target: "/profile?id=1".into(),
        }
    }

    #[test]
    fn html_verbose_shows_chain_escaped() {
        let page = HtmlRenderer.render(&details(), true);
        assert!(page.contains("<title>500 Internal Server Error</title>"));
        assert!(page.contains("loading &lt;profile&gt;"));
        assert!(page.contains("connection refused"));
        assert!(page.contains("GET /profile?id=1"));
    }

    #[test]
    fn html_generic_hides_detail() {
        let page = HtmlRenderer.render(&details(), false);
        assert!(page.contains("500 Internal Server Error"));
        assert!(!page.contains("profile"));
        assert!(!page.contains("connection refused"));
    }

    #[test]
    fn json_verbose_and_generic() {
        let verbose: serde_json::Value =
            serde_json::from_str(&JsonRenderer.render(&details(), true)).unwrap();
        assert_eq!(verbose["status"], 500);
        assert_eq!(verbose["error"]["type"], "internal");
        assert_eq!(verbose["error"]["message"], "loading <profile>");
        assert_eq!(verbose["error"]["causes"][0], "connection refused");
        assert_eq!(verbose["request"]["target"], "/profile?id=1");

        let generic: serde_json::Value =
            serde_json::from_str(&JsonRenderer.render(&details(), false)).unwrap();
        assert_eq!(generic, json!({"status": 500, "message": "Internal Server Error"}));
    }

    #[test]
    fn plain_text_layout() {
        assert_eq!(
            PlainTextRenderer.render(&details(), false),
            "500 Internal Server Error"
        );
        let verbose = PlainTextRenderer.render(&details(), true);
        assert!(verbose.contains("\nMessage: loading <profile>"));
        assert!(verbose.contains("\nCaused by: connection refused"));
    }

    #[test]
    fn registry_lookup_ignores_params_and_case() {
        let registry = RendererRegistry::with_defaults();
        assert_eq!(
            registry.get("Application/JSON; charset=utf-8").unwrap().content_type(),
            "application/json"
        );
        assert!(registry.get("image/png").is_none());
        assert_eq!(
            registry.media_types(),
            ["text/html", "application/json", "text/plain"]
        );
    }

    struct Xml;

    impl ErrorRenderer for Xml {
        fn content_type(&self) -> &'static str {
            "application/xml"
        }

        fn render(&self, details: &ErrorDetails, _verbose: bool) -> String {
            format!("<error code=\"{}\"/>", details.status.as_u16())
        }
    }

    #[test]
    fn registry_accepts_custom_renderer() {
        let mut registry = RendererRegistry::with_defaults();
        registry.register("application/xml", Xml);
        let body = registry.get("application/xml").unwrap().render(&details(), false);
        assert_eq!(body, "<error code=\"500\"/>");
        assert_eq!(registry.media_types().len(), 4);
    }
}
