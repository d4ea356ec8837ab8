//! `POST /api/request-access`, `GET /api/setup-status`, `POST /api/setup-pin`.
//!
//! All three are public (no session) — they exist to let a flat *get* a
//! session in the first place.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::identity;
use crate::ids::FlatId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RequestAccessBody {
    pub flat_id: String,
    pub name: String,
}

pub async fn request_access(
    State(state): State<AppState>,
    Json(body): Json<RequestAccessBody>,
) -> AppResult<Json<Value>> {
    let result = identity::create_access_request(&state.db, &body.flat_id, &body.name).await?;
    Ok(Json(json!({
        "ok": true,
        "id": result.id,
        "status": result.status,
        "reused": result.reused,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetupStatusQuery {
    pub flat_id: String,
}

pub async fn setup_status(
    State(state): State<AppState>,
    Query(query): Query<SetupStatusQuery>,
) -> AppResult<Json<Value>> {
    let status = identity::get_setup_status(&state.db, &query.flat_id).await?;
    let canonical = FlatId::canonicalize(&query.flat_id);
    Ok(Json(json!({
        "ok": true,
        "flat_id": canonical.as_str(),
        "request": status.request,
        "flat": status.flat,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetupPinBody {
    pub flat_id: String,
    pub code: String,
    pub pin4: String,
    pub password: Option<String>,
}

pub async fn setup_pin(
    State(state): State<AppState>,
    Json(body): Json<SetupPinBody>,
) -> AppResult<Json<Value>> {
    identity::setup_pin_with_code(
        &state.db,
        &body.flat_id,
        &body.code,
        &body.pin4,
        body.password.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "ok": true })))
}
