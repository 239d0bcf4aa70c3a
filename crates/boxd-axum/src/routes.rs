//! Route definitions and router construction.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::{any, delete, get, post};
use tower_http::cors::{Any, CorsLayer};

/// All `/api` routes, without the prefix (nested by [`create_router`]).
fn api_routes() -> Router<AppState> {
    Router::new()
        // Sessions
        .route("/session/create", post(handlers::sessions::create))
        .route("/session/list", get(handlers::sessions::list))
        .route("/session/{id}", delete(handlers::sessions::destroy))
        // Command execution
        .route("/execute", post(handlers::exec::execute))
        .route("/execute/stream", post(handlers::exec::execute_stream))
        // Files
        .route("/mkdir", post(handlers::files::mkdir))
        .route("/write", post(handlers::files::write))
        .route("/read", post(handlers::files::read))
        .route("/read/stream", post(handlers::files::read_stream))
        .route("/delete", post(handlers::files::delete))
        .route("/rename", post(handlers::files::rename))
        .route("/move", post(handlers::files::move_file))
        .route("/list-files", post(handlers::files::list_files))
        // Git
        .route("/git/checkout", post(handlers::git::checkout))
        // Ports
        .route("/expose-port", post(handlers::expose::expose))
        .route("/unexpose-port", post(handlers::expose::unexpose_body))
        .route("/exposed-ports", get(handlers::expose::list))
        .route("/exposed-ports/{port}", delete(handlers::expose::unexpose))
        // Background processes. kill-all precedes {id} so it is not
        // captured as a process id.
        .route("/process/start", post(handlers::process::start))
        .route("/process/list", get(handlers::process::list))
        .route("/process/kill-all", delete(handlers::process::kill_all))
        .route(
            "/process/{id}",
            get(handlers::process::get).delete(handlers::process::kill),
        )
        .route("/process/{id}/logs", get(handlers::process::logs))
        .route("/process/{id}/stream", get(handlers::process::stream))
        // Interpreter contexts
        .route(
            "/contexts",
            post(handlers::contexts::create).get(handlers::contexts::list),
        )
        .route("/contexts/{id}", delete(handlers::contexts::delete))
        .route("/execute/code", post(handlers::contexts::execute_code))
        // Misc
        .route("/health", get(handlers::misc::health))
        .route("/version", get(handlers::misc::version))
        .route("/ping", get(handlers::misc::ping))
        .route("/commands", get(handlers::misc::commands))
        .route("/shutdown", post(handlers::misc::shutdown))
}

/// The complete application router: `/api/*`, `/proxy/*`, permissive CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes())
        .route("/proxy", any(handlers::proxy::missing_port))
        .route("/proxy/", any(handlers::proxy::missing_port))
        .route("/proxy/{port}", any(handlers::proxy::forward_root))
        .route("/proxy/{port}/", any(handlers::proxy::forward_root))
        .route("/proxy/{port}/{*rest}", any(handlers::proxy::forward))
        .layer(cors)
        .with_state(state)
}
