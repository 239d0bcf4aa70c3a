//! Reverse proxy handlers: `/proxy/{port}/{*rest}`.

use crate::error::HttpError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, RawQuery, Request, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use boxd_core::SandboxError;

/// Forward one request to an exposed port.
pub async fn forward(
    State(state): State<AppState>,
    Path((port, rest)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, HttpError> {
    let port = parse_port(&port)?;
    proxy_to(&state, port, &rest, query.as_deref(), method, &headers, request.into_body()).await
}

/// `/proxy/{port}` with no trailing path.
pub async fn forward_root(
    State(state): State<AppState>,
    Path(port): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, HttpError> {
    let port = parse_port(&port)?;
    proxy_to(&state, port, "", query.as_deref(), method, &headers, request.into_body()).await
}

/// `/proxy` and `/proxy/` — no port to route to.
pub async fn missing_port() -> HttpError {
    HttpError(SandboxError::InvalidProxyUrl(
        "proxy path must include a port".into(),
    ))
}

fn parse_port(raw: &str) -> Result<u16, HttpError> {
    raw.parse::<u16>().map_err(|_| {
        HttpError(SandboxError::InvalidProxyUrl(format!(
            "invalid port in proxy path: {raw}"
        )))
    })
}

#[allow(clippy::too_many_arguments)]
async fn proxy_to(
    state: &AppState,
    port: u16,
    rest: &str,
    query: Option<&str>,
    method: Method,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, HttpError> {
    if !state.ports.is_exposed(port).await {
        return Err(HttpError(SandboxError::PortNotExposed(port)));
    }
    state.ports.touch(port).await;

    let response =
        boxd_proxy::forward::forward(&state.http, port, rest, query, method, headers, body)
            .await?;
    Ok(response)
}
