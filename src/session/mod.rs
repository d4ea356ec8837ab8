//! Cookie-bound server-side sessions.
//!
//! The cookie carries `{sid}.{hmac}` where the HMAC is keyed by
//! `SESSION_SECRET`, so a tampered or forged sid is rejected before it ever
//! reaches the database.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::SessionRow;
use crate::state::AppState;

pub const COOKIE_NAME: &str = "audix_user_sid";
const SID_LEN: usize = 32;
const DEFAULT_TTL_DAYS: i64 = 7;
const REMEMBER_TTL_DAYS: i64 = 30;

type HmacSha256 = Hmac<Sha256>;

fn sign(sid: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(sid.as_bytes());
    let bytes = mac.finalize().into_bytes();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds the `{sid}.{hmac}` value stored in the cookie.
pub fn signed_cookie_value(sid: &str, secret: &str) -> String {
    format!("{sid}.{}", sign(sid, secret))
}

/// Verifies a cookie value and, if valid, returns the bare sid.
pub fn verify_cookie_value(value: &str, secret: &str) -> Option<String> {
    let (sid, mac) = value.split_once('.')?;
    let expected = sign(sid, secret);
    use subtle::ConstantTimeEq;
    if expected.as_bytes().ct_eq(mac.as_bytes()).into() {
        Some(sid.to_string())
    } else {
        None
    }
}

fn generate_sid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SID_LEN)
        .map(char::from)
        .collect()
}

/// Creates a session row and returns `(signed cookie value, expires_at)`.
pub async fn create_session(
    pool: &PgPool,
    secret: &str,
    flat_id: &str,
    remember: bool,
) -> Result<(String, chrono::DateTime<Utc>), AppError> {
    let sid = generate_sid();
    let ttl = if remember {
        Duration::days(REMEMBER_TTL_DAYS)
    } else {
        Duration::days(DEFAULT_TTL_DAYS)
    };
    let expires_at = Utc::now() + ttl;

    sqlx::query("INSERT INTO user_sessions (sid, flat_id, expires_at) VALUES ($1, $2, $3)")
        .bind(&sid)
        .bind(flat_id)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok((signed_cookie_value(&sid, secret), expires_at))
}

pub async fn load_session(pool: &PgPool, sid: &str) -> Result<Option<SessionRow>, AppError> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT sid, flat_id, expires_at FROM user_sessions WHERE sid = $1",
    )
    .bind(sid)
    .fetch_optional(pool)
    .await?;

    Ok(row.filter(|r| r.expires_at > Utc::now()))
}

pub async fn delete_session(pool: &PgPool, sid: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM user_sessions WHERE sid = $1")
        .bind(sid)
        .execute(pool)
        .await?;
    Ok(())
}

/// Builds the `Set-Cookie` header value for a fresh login.
///
/// `remember` only affects the cookie's own `Max-Age` (30 days vs. a
/// session cookie with no explicit expiry) — the server-side row's TTL is
/// decided independently by [`create_session`], per spec §4.2 ("non-
/// persistent cookie whose server-side expiry is still 7 days").
pub fn build_cookie(value: String, remember: bool, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(COOKIE_NAME, value);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_secure(secure);
    if remember {
        cookie.set_max_age(time::Duration::days(REMEMBER_TTL_DAYS));
    }
    cookie
}

pub fn clear_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(COOKIE_NAME, "");
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::seconds(0));
    cookie
}

/// Resolves the session-authenticated flat id for page-style routes that
/// redirect to `/login` on failure instead of returning a JSON 401 (spec §6:
/// `GET /app` and `GET /api/live` both "302 → /login" on a missing or
/// invalid session, unlike the JSON control-API routes).
pub async fn resolve_flat_id(state: &AppState, jar: &CookieJar) -> Option<String> {
    let value = jar.get(COOKIE_NAME)?.value().to_string();
    let sid = verify_cookie_value(&value, &state.config.session_secret)?;
    load_session(&state.db, &sid).await.ok()?.map(|s| s.flat_id)
}

/// Extractor pulling the authenticated flat id out of the session cookie.
/// Any failure (missing cookie, bad signature, expired/unknown sid) maps to
/// `AppError::Unauthorized("UNAUTHORIZED")`.
pub struct AuthSession {
    pub flat_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let value = jar
            .get(COOKIE_NAME)
            .map(|c| c.value().to_string())
            .ok_or(AppError::Unauthorized("UNAUTHORIZED"))?;

        let sid = verify_cookie_value(&value, &state.config.session_secret)
            .ok_or(AppError::Unauthorized("UNAUTHORIZED"))?;

        let session = load_session(&state.db, &sid)
            .await?
            .ok_or(AppError::Unauthorized("UNAUTHORIZED"))?;

        Ok(AuthSession {
            flat_id: session.flat_id,
        })
    }
}
