//! `GET /api/live`, `POST /api/report`, `GET /api/internal/live-snapshot`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::error::AppResult;
use crate::session::{self, AuthSession};
use crate::state::AppState;

/// Mirrors `/app`'s redirect-on-missing-session behavior rather than the
/// JSON-401 pattern used by the other `/api/*` routes (spec §6 table lists
/// "302" in this route's errors column, matching `GET /app` exactly — both
/// are consumed by the same browser navigation flow right after login).
pub async fn live(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(flat_id) = session::resolve_flat_id(&state, &jar).await else {
        return Redirect::to("/login").into_response();
    };

    let stations = state.presence.public_stations().await;
    Json(json!({ "ok": true, "flat_id": flat_id, "stations": stations })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ReportBody {
    #[serde(rename = "stationId")]
    pub station_id: Option<String>,
}

/// Stub per spec §9 Open Questions: no strike/ban logic is implemented
/// server-side. Accepting and acknowledging the report is the entire
/// contract; nothing is persisted.
pub async fn report(_session: AuthSession, Json(body): Json<ReportBody>) -> AppResult<Json<serde_json::Value>> {
    if body.station_id.as_deref().unwrap_or("").is_empty() {
        return Err(crate::error::AppError::BadRequest("MISSING_FIELDS"));
    }
    Ok(Json(json!({ "ok": true })))
}

const LIVE_TOKEN_HEADER: &str = "x-audix-live-token";

pub async fn live_snapshot(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(supplied) = headers.get(LIVE_TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "UNAUTHORIZED" })),
        )
            .into_response();
    };

    let matches: bool = supplied
        .as_bytes()
        .ct_eq(state.config.live_token.as_bytes())
        .into();
    if !matches {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "UNAUTHORIZED" })),
        )
            .into_response();
    }

    let snapshot = state.presence.snapshot(state.started_at).await;
    Json(json!({ "ok": true, "snapshot": snapshot })).into_response()
}
