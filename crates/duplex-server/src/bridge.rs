//! Conversion between axum transport types and protocol messages.
//!
//! Inbound bodies are buffered up to a limit; outbound bodies may be
//! streamed. Repeated header names keep all their values in order.
//!
//! Transport headers live in an [`axum::http::HeaderMap`], which groups every
//! value of one name with the first occurrence of that name. Headers with
//! different names that arrive interleaved (`a`, `b`, `a`) therefore come out
//! grouped (`a`, `a`, `b`). Relative order within one name and the order of
//! first occurrences are preserved.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{Request, Response};
use bytes::BytesMut;
use futures::StreamExt;
use thiserror::Error;

use crate::http::{HttpRequest, HttpResponse, ResponseBody};

/// An inbound request that could not become an [`HttpRequest`].
#[derive(Debug, Error)]
pub enum MalformedRequest {
    /// The body is longer than the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// The limit in bytes.
        limit: usize,
    },
    /// Reading the body failed.
    #[error("failed to read request body: {0}")]
    Body(String),
    /// The request target carries no path.
    #[error("request target `{0}` has no path")]
    Target(String),
}

/// Buffer `request` into an [`HttpRequest`], reading at most `limit` bytes.
///
/// Headers come out grouped by name, see the module docs.
pub async fn to_message(
    request: Request<Body>,
    limit: usize,
) -> Result<HttpRequest, MalformedRequest> {
    let (parts, body) = request.into_parts();

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| MalformedRequest::Target(parts.uri.to_string()))?;

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(MalformedRequest::BodyTooLarge { limit });
    }

    let mut buf = BytesMut::with_capacity(declared.unwrap_or(0));
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| MalformedRequest::Body(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(MalformedRequest::BodyTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    Ok(HttpRequest {
        method: parts.method,
        target,
        version: parts.version,
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        body: buf.freeze(),
        peer,
        params: std::collections::HashMap::new(),
    })
}

/// Write `response` as an axum response. Streamed bodies use chunked transfer.
///
/// Headers are appended in order, then grouped by name as in [`to_message`].
pub fn to_transport(response: HttpResponse) -> Response<Body> {
    let HttpResponse {
        status,
        headers,
        body,
    } = response;

    let mut out = Response::new(match body {
        ResponseBody::Full(bytes) => Body::from(bytes),
        ResponseBody::Stream(stream) => Body::from_stream(stream),
    });
    *out.status_mut() = status;
    let map = out.headers_mut();
    map.reserve(headers.len());
    for (name, value) in headers {
        let _ = map.append(name, value);
    }
    out
}
