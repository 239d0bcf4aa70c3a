//! Health, version, ping, command catalogue and shutdown.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now(),
    }))
}

pub async fn version(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "version": state.config.sandbox_version,
        "timestamp": Utc::now(),
    }))
}

pub async fn ping() -> Json<Value> {
    Json(json!({
        "message": "pong",
        "timestamp": Utc::now(),
    }))
}

/// Catalogue of supported operations, for SDK discovery.
pub async fn commands() -> Json<Value> {
    let commands = json!([
        { "method": "POST", "path": "/api/session/create", "description": "Create a named session" },
        { "method": "GET", "path": "/api/session/list", "description": "List sessions" },
        { "method": "DELETE", "path": "/api/session/{id}", "description": "Destroy a session" },
        { "method": "POST", "path": "/api/execute", "description": "Execute a command" },
        { "method": "POST", "path": "/api/execute/stream", "description": "Execute a command, streaming output" },
        { "method": "POST", "path": "/api/mkdir", "description": "Create a directory" },
        { "method": "POST", "path": "/api/write", "description": "Write a file" },
        { "method": "POST", "path": "/api/read", "description": "Read a file" },
        { "method": "POST", "path": "/api/read/stream", "description": "Read a file, streaming chunks" },
        { "method": "POST", "path": "/api/delete", "description": "Delete a file" },
        { "method": "POST", "path": "/api/rename", "description": "Rename a file" },
        { "method": "POST", "path": "/api/move", "description": "Move a file" },
        { "method": "POST", "path": "/api/list-files", "description": "List directory contents" },
        { "method": "POST", "path": "/api/git/checkout", "description": "Clone a repository" },
        { "method": "POST", "path": "/api/expose-port", "description": "Expose a TCP port" },
        { "method": "DELETE", "path": "/api/exposed-ports/{port}", "description": "Unexpose a TCP port" },
        { "method": "GET", "path": "/api/exposed-ports", "description": "List exposed ports" },
        { "method": "POST", "path": "/api/process/start", "description": "Start a background process" },
        { "method": "GET", "path": "/api/process/list", "description": "List background processes" },
        { "method": "GET", "path": "/api/process/{id}", "description": "Inspect a background process" },
        { "method": "DELETE", "path": "/api/process/{id}", "description": "Kill a background process" },
        { "method": "GET", "path": "/api/process/{id}/logs", "description": "Fetch process logs" },
        { "method": "GET", "path": "/api/process/{id}/stream", "description": "Stream process logs" },
        { "method": "DELETE", "path": "/api/process/kill-all", "description": "Kill all background processes" },
        { "method": "POST", "path": "/api/contexts", "description": "Create an interpreter context" },
        { "method": "GET", "path": "/api/contexts", "description": "List interpreter contexts" },
        { "method": "DELETE", "path": "/api/contexts/{id}", "description": "Delete an interpreter context" },
        { "method": "POST", "path": "/api/execute/code", "description": "Execute code in a context, streaming results" },
        { "method": "ANY", "path": "/proxy/{port}/{path}", "description": "Proxy a request to an exposed port" },
    ]);
    let count = commands.as_array().map(Vec::len).unwrap_or(0);
    Json(json!({
        "commands": commands,
        "count": count,
        "timestamp": Utc::now(),
    }))
}

/// Acknowledge, then trigger graceful shutdown.
pub async fn shutdown(State(state): State<AppState>) -> Json<Value> {
    info!("shutdown requested via API");
    state.shutdown.notify_one();
    Json(json!({
        "success": true,
        "message": "shutting down",
        "timestamp": Utc::now(),
    }))
}
