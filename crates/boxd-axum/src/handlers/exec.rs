//! Command execution handlers: synchronous, streaming, and background.

use crate::error::{HttpError, HttpResult};
use crate::sse::sse_from_receiver;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use boxd_session::{ExecOptions, StartProcessOptions};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    pub command: String,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub background: bool,
}

impl ExecuteBody {
    /// Per-call env has no session-state side effects: it is applied with
    /// an `env` prefix on the composed command.
    fn effective_command(&self) -> String {
        if self.env.is_empty() {
            return self.command.clone();
        }
        let mut prefixed = String::from("env ");
        for (key, value) in &self.env {
            let assignment = format!("{key}={value}");
            prefixed.push_str(
                &shlex::try_quote(&assignment)
                    .map(|q| q.into_owned())
                    .unwrap_or(assignment),
            );
            prefixed.push(' ');
        }
        prefixed.push_str(&self.command);
        prefixed
    }
}

/// `POST /api/execute` — run to completion, or detach with `background`.
pub async fn execute(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBody>,
) -> HttpResult<Response> {
    if body.command.trim().is_empty() {
        return Err(HttpError(boxd_core::SandboxError::InvalidCommand(
            "command is empty".into(),
        )));
    }
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;

    if body.background {
        let info = session
            .processes()
            .start(
                &session,
                &body.command,
                StartProcessOptions {
                    cwd: body.cwd.clone(),
                    env: body.env.clone().into_iter().collect(),
                    ..StartProcessOptions::default()
                },
            )
            .await?;
        return Ok(Json(json!({
            "process": info,
            "timestamp": Utc::now(),
        }))
        .into_response());
    }

    let result = session
        .exec(&body.effective_command(), ExecOptions { cwd: body.cwd })
        .await?;
    Ok(Json(result).into_response())
}

/// `POST /api/execute/stream` — SSE of `ExecEvent`s.
pub async fn execute_stream(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBody>,
) -> HttpResult<Response> {
    if body.command.trim().is_empty() {
        return Err(HttpError(boxd_core::SandboxError::InvalidCommand(
            "command is empty".into(),
        )));
    }
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let events = session
        .exec_stream(&body.effective_command(), ExecOptions { cwd: body.cwd })
        .await?;
    Ok(sse_from_receiver(events).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefix_composition() {
        let body: ExecuteBody = serde_json::from_value(json!({
            "command": "echo $NAME",
            "env": { "NAME": "box d" },
        }))
        .unwrap();
        assert_eq!(body.effective_command(), "env 'NAME=box d' echo $NAME");

        let plain: ExecuteBody = serde_json::from_value(json!({ "command": "true" })).unwrap();
        assert_eq!(plain.effective_command(), "true");
    }
}
