//! Git checkout handler.

use crate::error::HttpResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use boxd_core::files::GitCheckoutResult;
use boxd_session::git::GitCheckoutOptions;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCheckoutBody {
    pub repo_url: String,
    pub branch: Option<String>,
    pub target_dir: Option<String>,
    pub session_id: Option<String>,
}

pub async fn checkout(
    State(state): State<AppState>,
    Json(body): Json<GitCheckoutBody>,
) -> HttpResult<Json<GitCheckoutResult>> {
    let session = state.sessions.resolve(body.session_id.as_deref()).await?;
    let result = session
        .git_checkout(
            &body.repo_url,
            GitCheckoutOptions {
                branch: body.branch,
                target_dir: body.target_dir,
            },
        )
        .await?;
    Ok(Json(result))
}
