//! `POST /api/login`, `POST /api/logout`.

use axum::extract::State;
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::identity;
use crate::session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub flat_id: String,
    pub pin4: String,
    pub password: Option<String>,
    #[serde(default)]
    pub remember: bool,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginBody>,
) -> AppResult<(CookieJar, Json<Value>)> {
    let result = identity::login_flat(
        &state.db,
        &body.flat_id,
        &body.pin4,
        body.password.as_deref(),
    )
    .await?;

    let (cookie_value, _expires_at) = session::create_session(
        &state.db,
        &state.config.session_secret,
        &result.flat_id,
        body.remember,
    )
    .await?;

    let cookie = session::build_cookie(cookie_value, body.remember, state.config.is_production);
    let jar = jar.add(cookie);

    Ok((jar, Json(json!({ "ok": true, "flat_id": result.flat_id }))))
}

/// Any caller may log out — an already-cleared cookie or unknown sid is a
/// no-op (spec §7: "connection-close cleanup must be idempotent"; the same
/// idempotence is expected here).
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<Value>)> {
    if let Some(value) = jar.get(session::COOKIE_NAME) {
        if let Some(sid) = session::verify_cookie_value(value.value(), &state.config.session_secret)
        {
            session::delete_session(&state.db, &sid).await?;
        }
    }
    let jar = jar.add(session::clear_cookie());
    Ok((jar, Json(json!({ "ok": true }))))
}
