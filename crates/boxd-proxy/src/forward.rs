//! Request forwarding to exposed ports with streaming support.
//!
//! Forwards a proxied request to `http://127.0.0.1:<port>/...`, preserving
//! method, headers, query and body, and streams the upstream response back
//! unchanged.

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use boxd_core::{Result, SandboxError};
use futures_util::TryStreamExt;
use reqwest::Client;
use tracing::{debug, warn};

/// Headers that should NOT be forwarded (hop-by-hop headers).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    // Recomputed by the client/server for the new hop
    "host",
    "content-length",
];

fn should_forward_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    !HOP_BY_HOP_HEADERS.contains(&lower.as_str())
}

/// Build the upstream URL for a proxied request.
pub fn upstream_url(port: u16, rest: &str, query: Option<&str>) -> String {
    let path = rest.trim_start_matches('/');
    match query {
        Some(q) if !q.is_empty() => format!("http://127.0.0.1:{port}/{path}?{q}"),
        _ => format!("http://127.0.0.1:{port}/{path}"),
    }
}

/// Forward one request to a local port and stream the response back.
///
/// Connection-level failures become `UpstreamUnreachable` (502); any HTTP
/// status the upstream produces, including errors, is relayed verbatim.
pub async fn forward(
    client: &Client,
    port: u16,
    rest: &str,
    query: Option<&str>,
    method: Method,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response> {
    let url = upstream_url(port, rest, query);
    debug!(%url, %method, "proxying request");

    let req_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| SandboxError::InvalidProxyUrl(format!("unsupported method: {method}")))?;

    let mut builder = client.request(req_method, &url);
    for (name, value) in headers {
        if should_forward_header(name.as_str())
            && let Ok(value_str) = value.to_str()
        {
            builder = builder.header(name.as_str(), value_str);
        }
    }

    let body_stream = body.into_data_stream();
    let builder = builder.body(reqwest::Body::wrap_stream(body_stream));

    let upstream = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(port, error = %e, "upstream unreachable");
            return Err(SandboxError::UpstreamUnreachable {
                port,
                message: e.to_string(),
            });
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if should_forward_header(name.as_str())
            && let Ok(value_str) = value.to_str()
        {
            response = response.header(name.as_str(), value_str);
        }
    }

    let byte_stream = upstream.bytes_stream().map_err(std::io::Error::other);
    response
        .body(Body::from_stream(byte_stream))
        .map_err(|e| SandboxError::Internal(format!("assembling proxy response: {e}")))
}
