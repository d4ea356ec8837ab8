use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// Application-wide error type. Every variant knows its own HTTP status —
/// unlike a flat error taxonomy keyed only by kind, several of the codes
/// below (`FLAT_NOT_FOUND`, `FLAT_DISABLED`, ...) mean 400 from one endpoint
/// and 401 from another, so the status is decided where the error is raised.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(&'static str),

    #[error("{0}")]
    Unauthorized(&'static str),

    /// Login rejected because the flat is banned. Carries `ban_until` so the
    /// client can render a countdown.
    #[error("BANNED")]
    LoginBanned(Option<DateTime<Utc>>),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal,
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(code) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "ok": false, "error": code }))).into_response()
            }
            AppError::Unauthorized(code) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "ok": false, "error": code }))).into_response()
            }
            AppError::LoginBanned(ban_until) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "ok": false, "error": "BANNED", "ban_until": ban_until })),
            )
                .into_response(),
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "ok": false, "error": "INTERNAL" })),
                )
                    .into_response()
            }
            AppError::Internal => {
                tracing::error!("internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "ok": false, "error": "INTERNAL" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn bad_request_returns_400_with_code() {
        let response = AppError::BadRequest("MISSING_FIELDS").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "MISSING_FIELDS");
    }

    #[tokio::test]
    async fn unauthorized_returns_401_with_code() {
        let response = AppError::Unauthorized("INVALID_CREDENTIALS").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn login_banned_carries_ban_until() {
        let until = Utc::now();
        let response = AppError::LoginBanned(Some(until)).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "BANNED");
        assert!(json["ban_until"].is_string());
    }

    #[tokio::test]
    async fn internal_error_returns_500() {
        let response = AppError::Internal.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
