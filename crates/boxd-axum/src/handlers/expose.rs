//! Exposed-port registry handlers.

use crate::error::HttpResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct ExposePortBody {
    pub port: u16,
    pub name: Option<String>,
}

pub async fn expose(
    State(state): State<AppState>,
    Json(body): Json<ExposePortBody>,
) -> HttpResult<Json<Value>> {
    let entry = state.ports.expose(body.port, body.name).await?;
    Ok(Json(json!({
        "success": true,
        "port": entry,
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UnexposePortBody {
    pub port: u16,
}

/// `POST /api/unexpose-port` (body form).
pub async fn unexpose_body(
    State(state): State<AppState>,
    Json(body): Json<UnexposePortBody>,
) -> HttpResult<Json<Value>> {
    unexpose(State(state), Path(body.port)).await
}

/// `DELETE /api/exposed-ports/{port}` (path form).
pub async fn unexpose(
    State(state): State<AppState>,
    Path(port): Path<u16>,
) -> HttpResult<Json<Value>> {
    state.ports.unexpose(port).await?;
    Ok(Json(json!({
        "success": true,
        "port": port,
        "timestamp": Utc::now(),
    })))
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let ports = state.ports.list().await;
    Json(json!({
        "count": ports.len(),
        "ports": ports,
        "timestamp": Utc::now(),
    }))
}
