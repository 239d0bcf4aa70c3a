//! File operation handlers; thin shims over the session filesystem facade.

use crate::error::HttpResult;
use crate::sse::sse_from_receiver;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use boxd_core::files::{FileEncoding, FileOpResult, ListFilesResult, ReadFileResult};
use boxd_session::fs::ListFilesOptions;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBody {
    pub path: String,
    pub content: String,
    pub encoding: Option<FileEncoding>,
    pub session_id: Option<String>,
}

pub async fn write(
    State(state): State<AppState>,
    Json(body): Json<WriteBody>,
) -> HttpResult<Json<FileOpResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session
        .write_file(&body.path, &body.content, body.encoding)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadBody {
    pub path: String,
    pub session_id: Option<String>,
}

pub async fn read(
    State(state): State<AppState>,
    Json(body): Json<ReadBody>,
) -> HttpResult<Json<ReadFileResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session.read_file(&body.path).await?;
    Ok(Json(result))
}

/// Streaming read: SSE of `chunk` events with a terminal `complete`.
pub async fn read_stream(
    State(state): State<AppState>,
    Json(body): Json<ReadBody>,
) -> HttpResult<Response> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let events = session.read_file_stream(&body.path).await?;
    Ok(sse_from_receiver(events).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MkdirBody {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    pub session_id: Option<String>,
}

pub async fn mkdir(
    State(state): State<AppState>,
    Json(body): Json<MkdirBody>,
) -> HttpResult<Json<FileOpResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session.mkdir(&body.path, body.recursive).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBody {
    pub path: String,
    pub session_id: Option<String>,
}

pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<DeleteBody>,
) -> HttpResult<Json<FileOpResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session.delete_file(&body.path).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    pub old_path: String,
    pub new_path: String,
    pub session_id: Option<String>,
}

pub async fn rename(
    State(state): State<AppState>,
    Json(body): Json<RenameBody>,
) -> HttpResult<Json<FileOpResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session.rename_file(&body.old_path, &body.new_path).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBody {
    pub source_path: String,
    pub destination_path: String,
    pub session_id: Option<String>,
}

pub async fn move_file(
    State(state): State<AppState>,
    Json(body): Json<MoveBody>,
) -> HttpResult<Json<FileOpResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session
        .move_file(&body.source_path, &body.destination_path)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesBody {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_hidden: bool,
    pub session_id: Option<String>,
}

pub async fn list_files(
    State(state): State<AppState>,
    Json(body): Json<ListFilesBody>,
) -> HttpResult<Json<ListFilesResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session
        .list_files(
            &body.path,
            ListFilesOptions {
                recursive: body.recursive,
                include_hidden: body.include_hidden,
            },
        )
        .await?;
    Ok(Json(result))
}
