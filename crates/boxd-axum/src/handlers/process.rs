//! Background process handlers.
//!
//! Process ids resolve across sessions (first match in session-id order)
//! unless a `session` query parameter pins the lookup.

use crate::error::HttpResult;
use crate::sse::sse_from_stream;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use boxd_core::ProcessStreamEvent;
use boxd_session::StartProcessOptions;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessBody {
    pub command: String,
    #[serde(default)]
    pub options: StartOptionsBody,
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptionsBody {
    pub process_id: Option<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Milliseconds after which the process is killed.
    pub timeout_ms: Option<u64>,
    pub auto_cleanup: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session: Option<String>,
}

pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartProcessBody>,
) -> HttpResult<Json<Value>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let info = session
        .processes()
        .start(
            &session,
            &body.command,
            StartProcessOptions {
                process_id: body.options.process_id,
                cwd: body.options.cwd,
                env: body.options.env.into_iter().collect(),
                timeout: body.options.timeout_ms.map(Duration::from_millis),
                auto_cleanup: body.options.auto_cleanup.unwrap_or(true),
            },
        )
        .await?;

    Ok(Json(json!({
        "process": info,
        "timestamp": Utc::now(),
    })))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> HttpResult<Json<Value>> {
    let processes = match &query.session {
        Some(session_id) => {
            let session = state.sessions.get(session_id).await?;
            session.processes().list().await
        }
        None => {
            let mut all = Vec::new();
            for info in state.sessions.list().await {
                // A session destroyed mid-iteration just drops out.
                if let Ok(session) = state.sessions.get(&info.id).await {
                    all.extend(session.processes().list().await);
                }
            }
            all
        }
    };

    Ok(Json(json!({
        "processes": processes,
        "count": processes.len(),
        "timestamp": Utc::now(),
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<Value>> {
    let (_, info) = state.sessions.find_process(&id).await?;
    Ok(Json(json!({
        "process": info,
        "timestamp": Utc::now(),
    })))
}

pub async fn kill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<Value>> {
    let (session, _) = state.sessions.find_process(&id).await?;
    let info = session.processes().kill(&id).await?;
    Ok(Json(json!({
        "success": true,
        "process": info,
        "timestamp": Utc::now(),
    })))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<Value>> {
    let (session, _) = state.sessions.find_process(&id).await?;
    let logs = session.processes().logs(&id).await?;
    Ok(Json(json!({
        "stdout": logs.stdout,
        "stderr": logs.stderr,
        "processId": id,
        "sessionId": session.id,
        "timestamp": Utc::now(),
    })))
}

/// `GET /api/process/{id}/stream` — already-captured text first, then live
/// deltas, closed by exactly one `complete`.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Response> {
    let (session, _) = state.sessions.find_process(&id).await?;
    let (snapshot, terminal, mut live) = session.processes().stream(&id).await?;

    let events = async_stream::stream! {
        if !snapshot.stdout.is_empty() {
            yield ProcessStreamEvent::Stdout { data: snapshot.stdout };
        }
        if !snapshot.stderr.is_empty() {
            yield ProcessStreamEvent::Stderr { data: snapshot.stderr };
        }
        if let Some((status, exit_code)) = terminal {
            yield ProcessStreamEvent::Complete { status, exit_code };
            return;
        }
        loop {
            match live.recv().await {
                Ok(event) => {
                    let done = event.is_terminal();
                    yield event;
                    if done {
                        break;
                    }
                }
                // Lagged subscribers lose deltas but never the terminal
                // event: keep draining.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Ok(sse_from_stream(events).into_response())
}

pub async fn kill_all(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> HttpResult<Json<Value>> {
    let killed = match &query.session {
        Some(session_id) => {
            let session = state.sessions.get(session_id).await?;
            session.processes().kill_all().await
        }
        None => {
            let mut total = 0;
            for info in state.sessions.list().await {
                if let Ok(session) = state.sessions.get(&info.id).await {
                    total += session.processes().kill_all().await;
                }
            }
            total
        }
    };

    Ok(Json(json!({
        "success": true,
        "killedCount": killed,
        "message": format!("killed {killed} processes"),
        "timestamp": Utc::now(),
    })))
}
