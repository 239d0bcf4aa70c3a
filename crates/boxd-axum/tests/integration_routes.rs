//! Integration tests for the HTTP surface.
//!
//! These drive the router directly with `oneshot` requests. Routes that
//! would spawn control children or kernels are covered by the unit suites
//! of their components; here we verify wiring, envelopes and status codes.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use boxd_axum::{build_state, create_router};
use boxd_core::Config;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const TEST_DAEMON_PORT: u16 = 3000;

fn app() -> Router {
    let state = build_state(Config::default(), TEST_DAEMON_PORT);
    create_router(state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok_with_uptime() {
    let (status, body) = send(app(), get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["uptimeSecs"].is_u64());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn version_defaults_to_unknown() {
    let (status, body) = send(app(), get("/api/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], "unknown");
}

#[tokio::test]
async fn ping_pongs() {
    let (status, body) = send(app(), get("/api/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong");
}

#[tokio::test]
async fn commands_catalogue_is_nonempty() {
    let (status, body) = send(app(), get("/api/commands")).await;
    assert_eq!(status, StatusCode::OK);
    let commands = body["commands"].as_array().unwrap();
    assert!(!commands.is_empty());
    assert_eq!(body["count"], commands.len());
}

#[tokio::test]
async fn session_list_starts_empty() {
    let (status, body) = send(app(), get("/api/session/list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert_eq!(body["sessions"], json!([]));
}

#[tokio::test]
async fn expose_port_round_trip_and_conflict() {
    let app = app();

    let (status, body) = send(
        app.clone(),
        post_json("/api/expose-port", json!({"port": 8080, "name": "web"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["port"]["port"], 8080);

    let (status, body) = send(app.clone(), get("/api/exposed-ports")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["ports"][0]["port"], 8080);
    assert_eq!(body["ports"][0]["status"], "active");

    // Second expose conflicts.
    let (status, body) = send(
        app.clone(),
        post_json("/api/expose-port", json!({"port": 8080})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PORT_ALREADY_EXPOSED");

    // Path-shaped unexpose.
    let (status, _) = send(app.clone(), delete("/api/exposed-ports/8080")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(app, get("/api/exposed-ports")).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn invalid_port_is_rejected() {
    let (status, body) = send(
        app(),
        post_json("/api/expose-port", json!({"port": 80})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_PORT");
}

#[tokio::test]
async fn unexpose_unknown_port_is_404() {
    let (status, body) = send(app(), delete("/api/exposed-ports/9999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "PORT_NOT_EXPOSED");
}

#[tokio::test]
async fn proxy_without_port_is_invalid() {
    let (status, body) = send(app(), get("/proxy/")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "INVALID_PROXY_URL");
}

#[tokio::test]
async fn proxy_non_numeric_port_is_invalid() {
    let (status, body) = send(app(), get("/proxy/web/index.html")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "INVALID_PROXY_URL");
}

#[tokio::test]
async fn proxy_to_unexposed_port_is_404() {
    let (status, body) = send(app(), get("/proxy/8080/index.html")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "PORT_NOT_EXPOSED");
}

#[tokio::test]
async fn proxy_forwards_to_a_live_upstream() {
    // A tiny upstream on loopback that answers 200 "ok".
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_port = listener.local_addr().unwrap().port();
    let upstream = Router::new().route("/index.html", axum::routing::get(|| async { "ok" }));
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.unwrap();
    });

    let app = app();
    let (status, _) = send(
        app.clone(),
        post_json("/api/expose-port", json!({"port": upstream_port})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get(&format!("/proxy/{upstream_port}/index.html")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");

    // After unexposing, the same request 404s without contacting upstream.
    let (status, _) = send(
        app.clone(),
        delete(&format!("/api/exposed-ports/{upstream_port}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(app, get(&format!("/proxy/{upstream_port}/index.html"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proxy_unreachable_upstream_is_502() {
    let app = app();
    // Expose a port nothing listens on.
    let (status, _) = send(
        app.clone(),
        post_json("/api/expose-port", json!({"port": 59999})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(app, get("/proxy/59999/")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "UPSTREAM_UNREACHABLE");
    assert_eq!(body["error"]["context"]["port"], 59999);
}

#[tokio::test]
async fn contexts_are_gated_until_interpreter_is_ready() {
    let (status, body) = send(
        app(),
        post_json("/api/contexts", json!({"language": "python"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "INTERPRETER_NOT_READY");
    let progress = body["progress"].as_u64().unwrap();
    assert!(progress <= 100);
}

#[tokio::test]
async fn not_ready_carries_retry_after_header() {
    let response = app()
        .oneshot(post_json("/api/execute/code", json!({"code": "1 + 1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn unknown_process_is_404() {
    let (status, body) = send(app(), get("/api/process/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RESOURCE_NOT_FOUND");
    assert_eq!(body["error"]["context"]["resource"], "process");
}

#[tokio::test]
async fn kill_unknown_process_is_404() {
    let (status, body) = send(app(), delete("/api/process/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn process_list_starts_empty() {
    let (status, body) = send(app(), get("/api/process/list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn destroy_unknown_session_is_404() {
    let (status, body) = send(app(), delete("/api/session/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn context_list_starts_empty() {
    let (status, body) = send(app(), get("/api/contexts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}
