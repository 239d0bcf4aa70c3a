//! Interpreter context handlers.

use crate::error::HttpResult;
use crate::sse::sse_from_receiver;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use boxd_interp::CreateContextOptions;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContextBody {
    pub language: Option<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

pub async fn create(
    State(state): State<AppState>,
    body: Option<Json<CreateContextBody>>,
) -> HttpResult<Json<Value>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let info = state
        .interp
        .create_context(CreateContextOptions {
            language: body.language,
            cwd: body.cwd,
            env_vars: body.env_vars.into_iter().collect(),
        })
        .await?;
    Ok(Json(serde_json::to_value(info).unwrap_or_else(|_| json!({}))))
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let contexts = state.interp.list_contexts().await;
    Json(json!({
        "contexts": contexts,
        "count": contexts.len(),
        "timestamp": Utc::now(),
    }))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<Value>> {
    state.interp.delete_context(&id).await?;
    Ok(Json(json!({
        "success": true,
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteCodeBody {
    pub context_id: Option<String>,
    pub code: String,
    pub language: Option<String>,
}

/// `POST /api/execute/code` — stream kernel events for one execution.
pub async fn execute_code(
    State(state): State<AppState>,
    Json(body): Json<ExecuteCodeBody>,
) -> HttpResult<Response> {
    let events = state
        .interp
        .execute_code(
            body.context_id.as_deref(),
            &body.code,
            body.language.as_deref(),
        )
        .await?;
    Ok(sse_from_receiver(events).into_response())
}
