//! HTTP mapping of the domain error.
//!
//! One envelope for every failure:
//! `{error: {code, message, context?}, httpStatus, timestamp}`, with
//! `Retry-After` on 503-class errors and a top-level `progress` during
//! interpreter warm-up.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use boxd_core::SandboxError;
use chrono::Utc;
use serde_json::json;

/// Wrapper giving `SandboxError` an `IntoResponse`.
#[derive(Debug)]
pub struct HttpError(pub SandboxError);

impl From<SandboxError> for HttpError {
    fn from(err: SandboxError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = json!({
            "error": {
                "code": err.code(),
                "message": err.to_string(),
            },
            "httpStatus": status.as_u16(),
            "timestamp": Utc::now(),
        });
        if let Some(context) = err.context() {
            if let SandboxError::InterpreterNotReady { progress, .. } = &err {
                body["progress"] = json!(progress);
            }
            body["error"]["context"] = context;
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = err.retry_after()
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Handler result alias.
pub type HttpResult<T> = Result<T, HttpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_ready_maps_to_503_with_retry_after() {
        let response = HttpError(SandboxError::InterpreterNotReady {
            progress: 40,
            retry_after: 5,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            HeaderValue::from_static("5")
        );
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERPRETER_NOT_READY");
        assert_eq!(body["progress"], 40);
    }

    #[tokio::test]
    async fn conflict_envelope_shape() {
        let response = HttpError(SandboxError::PortAlreadyExposed(8080)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "PORT_ALREADY_EXPOSED");
        assert_eq!(body["error"]["context"]["port"], 8080);
        assert_eq!(body["httpStatus"], 409);
        assert!(body["timestamp"].is_string());
    }
}
