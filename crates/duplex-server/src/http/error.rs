//! Handler failures and their status mapping.

use std::time::Duration;

use axum::http::{Method, StatusCode};
use thiserror::Error;

use crate::bridge::MalformedRequest;

/// A failure while producing a response.
///
/// Converted to a rendered error response by the error middleware.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No route matches the path.
    #[error("no route for {method} {path}")]
    NotFound {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
    },
    /// A route matches the path but not the method.
    #[error("method not allowed; allowed: {}", join_methods(.allowed))]
    MethodNotAllowed {
        /// Methods the path accepts.
        allowed: Vec<Method>,
    },
    /// The request is invalid.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The request body exceeds the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// The limit in bytes.
        limit: usize,
    },
    /// The server cannot take the request right now.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The handler did not finish in time.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
    /// The handler failed.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Status code sent for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) | Self::Panicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
            Self::Panicked(_) => "panicked",
        }
    }

    /// Messages of this error and every source below it.
    pub fn chain(&self) -> Vec<String> {
        match self {
            Self::Internal(err) => err.chain().map(ToString::to_string).collect(),
            other => {
                let mut chain = vec![other.to_string()];
                let mut source = std::error::Error::source(other);
                while let Some(err) = source {
                    chain.push(err.to_string());
                    source = err.source();
                }
                chain
            }
        }
    }
}

impl From<MalformedRequest> for HandlerError {
    fn from(err: MalformedRequest) -> Self {
        match err {
            MalformedRequest::BodyTooLarge { limit } => Self::PayloadTooLarge { limit },
            other => Self::BadRequest(other.to_string()),
        }
    }
}

fn join_methods(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
