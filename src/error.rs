//! Central error taxonomy
//!
//! Protocol adapters return `GatewayError` and let the `IntoResponse` impl
//! decide the wire shape. Listing endpoints usually degrade instead of
//! returning these; authentication and single-object lookups surface them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout, or non-2xx from the upstream panel
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Upstream rejected the supplied credentials
    #[error("upstream authentication failed")]
    UpstreamAuthFailed,

    /// No active upstream server is configured
    #[error("no upstream server configured")]
    NoProviderConfigured,

    /// Upstream body did not parse as the expected shape
    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    /// Local database failure
    #[error("local store error: {0}")]
    LocalStore(#[from] sqlx::Error),

    /// Invalid client-supplied input on a write path
    #[error("{0}")]
    Validation(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            // Xtream clients key off this exact body to render their native
            // login-failed screen.
            GatewayError::UpstreamAuthFailed => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "user_info": { "auth": 0 } })),
            )
                .into_response(),
            GatewayError::NoProviderConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "No upstream server configured" })),
            )
                .into_response(),
            GatewayError::UpstreamUnreachable(msg) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("Upstream unreachable: {}", msg) })),
            )
                .into_response(),
            GatewayError::MalformedUpstreamResponse(msg) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("Malformed upstream response: {}", msg) })),
            )
                .into_response(),
            GatewayError::LocalStore(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": format!("Database error: {}", e) })),
                )
                    .into_response()
            }
            GatewayError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auth_failure_uses_xtream_denial_body() {
        let resp = GatewayError::UpstreamAuthFailed.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["user_info"]["auth"], 0);
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (
                GatewayError::UpstreamUnreachable("timeout".into()).into_response(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                GatewayError::NoProviderConfigured.into_response(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GatewayError::MalformedUpstreamResponse("not json".into()).into_response(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                GatewayError::Validation("missing title".into()).into_response(),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (resp, expected) in cases {
            assert_eq!(resp.status(), expected);
        }
    }
}
