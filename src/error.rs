use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;
use crate::token::TokenError;

/// Message returned for every authentication failure.
///
/// Missing header, malformed token, bad signature, expiry, wrong token class
/// and unknown subject all look the same to the client.
pub const AUTHENTICATION_FAILED: &str = "Invalid or expired credentials.";

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Security Outcomes
///
/// The auth layer surfaces exactly three client-visible rejections:
///
/// - `Unauthorized` (401) - any problem with the presented credential
/// - `Forbidden` (403) - valid credential lacking a required permission
/// - `RateLimited` (429) - transient, carries the remaining wait
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed")]
    Unauthorized,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Rate limited for {retry_after:?}")]
    RateLimited { retry_after: Duration, limit: u32 },

    #[error("User store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Expected a JSON request body")]
    UnsupportedMediaType,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::Conflict(_) => AppError::Conflict("Account already exists".to_string()),
            StoreError::NotFound(id) => AppError::NotFound(format!("user {id}")),
        }
    }
}

/// Body rejections from [`crate::handlers::JsonBody`].
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge,
            StatusCode::UNSUPPORTED_MEDIA_TYPE => AppError::UnsupportedMediaType,
            _ => AppError::InvalidBody(sanitize_body_error(&rejection.body_text())),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Internal(format!("token issuance failed: {err}"))
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

/// Whole seconds a client should wait, never less than one.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Rejections are routine; only server-side faults are errors.
        match &self {
            AppError::Unauthorized
            | AppError::Forbidden
            | AppError::RateLimited { .. }
            | AppError::NotFound(_)
            | AppError::Conflict(_)
            | AppError::BadRequest(_)
            | AppError::InvalidBody(_)
            | AppError::PayloadTooLarge
            | AppError::UnsupportedMediaType => {
                tracing::debug!(error = %self, "Request rejected");
            }
            _ => tracing::error!(error = %self, "Request failed"),
        }

        let (status, error_type, message) = match &self {
            AppError::Unauthorized => {
                let body = ErrorResponse {
                    error: "unauthorized".to_string(),
                    message: AUTHENTICATION_FAILED.to_string(),
                    retry_after_secs: None,
                };
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    axum::Json(body),
                )
                    .into_response();
            }
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "You do not have permission to perform this action.".to_string(),
            ),
            AppError::RateLimited { retry_after, limit } => {
                let secs = retry_after_secs(*retry_after);
                let body = ErrorResponse {
                    error: "too_many_requests".to_string(),
                    message: format!(
                        "Too many requests. Please retry in {}.",
                        humantime::format_duration(Duration::from_secs(secs))
                    ),
                    retry_after_secs: Some(secs),
                };
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [
                        (header::RETRY_AFTER.as_str(), secs.to_string()),
                        ("x-ratelimit-limit", limit.to_string()),
                        ("x-ratelimit-remaining", "0".to_string()),
                    ],
                    axum::Json(body),
                )
                    .into_response();
            }

            // Never expose internal details to clients
            AppError::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "Service is temporarily unavailable. Please try again later.".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string(),
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.".to_string(),
            ),

            // Client errors - safe to show the message as it's user-facing
            AppError::InvalidBody(msg) => (StatusCode::BAD_REQUEST, "invalid_body", msg.clone()),
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Request body exceeds the size limit.".to_string(),
            ),
            AppError::UnsupportedMediaType => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                "Expected `Content-Type: application/json`.".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            retry_after_secs: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Reduce JSON body errors to messages that do not leak internal type names.
fn sanitize_body_error(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_is_generic() {
        let response = AppError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        let body = body_json(response).await;
        assert_eq!(body["message"], AUTHENTICATION_FAILED);
    }

    #[tokio::test]
    async fn test_rate_limited_carries_wait() {
        let response = AppError::RateLimited {
            retry_after: Duration::from_secs(90),
            limit: 3,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "90");
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "3");

        let body = body_json(response).await;
        assert_eq!(body["retry_after_secs"], 90);
        assert!(body["message"].as_str().unwrap().contains("1m 30s"));
    }

    #[tokio::test]
    async fn test_store_unavailable_hides_details() {
        let response = AppError::StoreUnavailable("pg: connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("pg"));
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err: AppError = StoreError::Conflict("a@example.com".into()).into();
        assert!(matches!(err, AppError::Conflict(ref m) if !m.contains("a@example.com")));
    }

    #[test]
    fn test_sanitize_missing_field() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Login {
            email: String,
        }
        let err = serde_json::from_str::<Login>("{}").unwrap_err();
        assert_eq!(
            sanitize_body_error(&err.to_string()),
            "Missing required field: email"
        );
    }

    #[test]
    fn test_sanitize_hides_type_names() {
        let msg = "Failed to deserialize the JSON body into the target type: \
                   permissions: invalid type: string \"x\", expected u32 at line 1 column 20";
        assert_eq!(sanitize_body_error(msg), "Invalid data type in request body");
        assert_eq!(
            sanitize_body_error("Failed to parse the request body as JSON: EOF while parsing"),
            "Malformed JSON in request body"
        );
    }

    #[tokio::test]
    async fn test_json_rejections_map_to_error_body() {
        use axum::extract::FromRequest;

        type Counts = axum::Json<std::collections::HashMap<String, u32>>;

        async fn reject(content_type: Option<&str>, body: &'static str) -> AppError {
            let mut builder = axum::http::Request::post("/");
            if let Some(ct) = content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            let req = builder.body(axum::body::Body::from(body)).unwrap();
            Counts::from_request(req, &()).await.unwrap_err().into()
        }

        let err = reject(Some("application/json"), "{").await;
        assert!(
            matches!(err, AppError::InvalidBody(ref m) if m == "Malformed JSON in request body")
        );

        let err = reject(Some("application/json"), r#"{"a":"b"}"#).await;
        assert!(
            matches!(err, AppError::InvalidBody(ref m) if m == "Invalid data type in request body")
        );

        let err = reject(None, "{}").await;
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body_json(response).await["error"], "unsupported_media_type");
    }
}
