//! Session lifecycle handlers.

use crate::error::HttpResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use boxd_session::SessionOptions;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub id: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub isolation: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> HttpResult<Json<Value>> {
    let session = state
        .sessions
        .create(SessionOptions {
            id: body.id,
            cwd: body.cwd,
            env: body.env.into_iter().collect(),
            isolation: body.isolation,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "id": session.id,
        "message": "session created",
        "timestamp": Utc::now(),
    })))
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.sessions.list().await;
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
        "timestamp": Utc::now(),
    }))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<Value>> {
    state.sessions.destroy(&id).await?;
    Ok(Json(json!({
        "success": true,
        "id": id,
        "message": "session destroyed",
        "timestamp": Utc::now(),
    })))
}
