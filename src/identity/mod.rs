//! Flat lifecycle: access requests, setup codes, credentials, bans.
//!
//! Every public function here canonicalizes its own `flat_id` argument, so
//! callers (HTTP handlers) can pass the raw string straight from the request
//! body.

pub mod admin;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::ids::FlatId;
use crate::models::{
    AccessRequestResult, FlatRequestRow, FlatRequestStatus, FlatRequestView, FlatRow, FlatStatus,
    FlatView, LoginResult, SetupCodeRow, SetupStatusResponse,
};

const HASH_COST: u32 = 12;

static PIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());

/// bcrypt is CPU-bound enough to starve the async scheduler under load, so
/// every hash/verify call is pushed onto the blocking thread pool (spec §5:
/// "bcrypt-style hashing... must execute on a worker pool").
async fn hash_blocking(plain: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, HASH_COST))
        .await
        .map_err(|_| AppError::Internal)?
        .map_err(|_| AppError::Internal)
}

async fn verify_blocking(plain: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

pub async fn create_access_request(
    pool: &PgPool,
    flat_id: &str,
    name: &str,
) -> AppResult<AccessRequestResult> {
    let flat_id = FlatId::canonicalize(flat_id);
    if flat_id.as_str().is_empty() || name.trim().is_empty() {
        return Err(AppError::BadRequest("MISSING_FIELDS"));
    }

    if let Some(existing) = sqlx::query_as::<_, FlatRequestRow>(
        "SELECT id, flat_id, name, note, status, created_at, updated_at \
         FROM flat_requests WHERE flat_id = $1 AND status = 'PENDING' \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(flat_id.as_str())
    .fetch_optional(pool)
    .await?
    {
        return Ok(AccessRequestResult {
            id: existing.id,
            status: FlatRequestStatus::Pending,
            reused: true,
        });
    }

    let now = Utc::now();
    let row = sqlx::query_as::<_, FlatRequestRow>(
        "INSERT INTO flat_requests (flat_id, name, note, status, created_at, updated_at) \
         VALUES ($1, $2, '', 'PENDING', $3, $3) \
         RETURNING id, flat_id, name, note, status, created_at, updated_at",
    )
    .bind(flat_id.as_str())
    .bind(name.trim())
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(AccessRequestResult {
        id: row.id,
        status: FlatRequestStatus::Pending,
        reused: false,
    })
}

pub async fn get_setup_status(pool: &PgPool, flat_id: &str) -> AppResult<SetupStatusResponse> {
    let flat_id = FlatId::canonicalize(flat_id);
    if flat_id.as_str().is_empty() {
        return Err(AppError::BadRequest("MISSING_FLAT_ID"));
    }

    let request = sqlx::query_as::<_, FlatRequestRow>(
        "SELECT id, flat_id, name, note, status, created_at, updated_at \
         FROM flat_requests WHERE flat_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(flat_id.as_str())
    .fetch_optional(pool)
    .await?;

    let flat = sqlx::query_as::<_, FlatRow>(
        "SELECT flat_id, status, pin_hash, password_hash, strike_count, ban_until, \
         requires_admin_revoke, created_at, updated_at, last_login_at \
         FROM flats WHERE flat_id = $1",
    )
    .bind(flat_id.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(SetupStatusResponse {
        request: request.as_ref().map(FlatRequestView::from),
        flat: flat.as_ref().map(FlatView::from),
    })
}

pub async fn setup_pin_with_code(
    pool: &PgPool,
    flat_id: &str,
    code: &str,
    pin4: &str,
    password: Option<&str>,
) -> AppResult<()> {
    let flat_id = FlatId::canonicalize(flat_id);
    if flat_id.as_str().is_empty() || code.is_empty() || pin4.is_empty() {
        return Err(AppError::BadRequest("MISSING_FIELDS"));
    }
    if !PIN_RE.is_match(pin4) {
        return Err(AppError::BadRequest("PIN_MUST_BE_4_DIGITS"));
    }

    let flat = sqlx::query_as::<_, FlatRow>(
        "SELECT flat_id, status, pin_hash, password_hash, strike_count, ban_until, \
         requires_admin_revoke, created_at, updated_at, last_login_at \
         FROM flats WHERE flat_id = $1",
    )
    .bind(flat_id.as_str())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::BadRequest("FLAT_NOT_FOUND"))?;

    if flat.status.parse::<FlatStatus>() != Ok(FlatStatus::Active) {
        return Err(AppError::BadRequest("FLAT_DISABLED"));
    }

    let candidates = sqlx::query_as::<_, SetupCodeRow>(
        "SELECT id, flat_id, code_hash, expires_at, used_at, created_at \
         FROM setup_codes WHERE flat_id = $1 ORDER BY created_at DESC LIMIT 5",
    )
    .bind(flat_id.as_str())
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    let mut valid_candidates = candidates
        .iter()
        .filter(|c| c.used_at.is_none() && c.expires_at > now)
        .peekable();

    if valid_candidates.peek().is_none() {
        return Err(AppError::BadRequest("NO_VALID_CODE"));
    }

    let mut matched = None;
    for candidate in valid_candidates {
        if verify_blocking(code.to_string(), candidate.code_hash.clone()).await {
            matched = Some(candidate);
            break;
        }
    }
    let matched = matched.ok_or(AppError::BadRequest("INVALID_CODE"))?;

    let pin_hash = hash_blocking(pin4.to_string()).await?;
    let password_hash = match password {
        Some(p) if !p.is_empty() => Some(hash_blocking(p.to_string()).await?),
        _ => None,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE flats SET pin_hash = $1, password_hash = COALESCE($2, password_hash), \
         updated_at = $3 WHERE flat_id = $4",
    )
    .bind(&pin_hash)
    .bind(&password_hash)
    .bind(now)
    .bind(flat_id.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE setup_codes SET used_at = $1 WHERE id = $2")
        .bind(now)
        .bind(matched.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn login_flat(
    pool: &PgPool,
    flat_id: &str,
    pin4: &str,
    password: Option<&str>,
) -> AppResult<LoginResult> {
    let flat_id = FlatId::canonicalize(flat_id);

    let flat = sqlx::query_as::<_, FlatRow>(
        "SELECT flat_id, status, pin_hash, password_hash, strike_count, ban_until, \
         requires_admin_revoke, created_at, updated_at, last_login_at \
         FROM flats WHERE flat_id = $1",
    )
    .bind(flat_id.as_str())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::Unauthorized("FLAT_NOT_FOUND"))?;

    if flat.status.parse::<FlatStatus>() != Ok(FlatStatus::Active) {
        return Err(AppError::Unauthorized("FLAT_DISABLED"));
    }

    if let Some(until) = flat.ban_until {
        if until > Utc::now() {
            return Err(AppError::LoginBanned(Some(until)));
        }
    }

    if flat.requires_admin_revoke {
        return Err(AppError::Unauthorized("ADMIN_REVOKE_REQUIRED"));
    }

    let pin_hash = flat
        .pin_hash
        .as_ref()
        .ok_or(AppError::Unauthorized("PIN_NOT_SET"))?;

    if !PIN_RE.is_match(pin4) {
        return Err(AppError::Unauthorized("INVALID_PIN"));
    }

    if let Some(expected_hash) = flat.password_hash.as_ref() {
        let supplied = password.unwrap_or("");
        if supplied.is_empty() {
            return Err(AppError::Unauthorized("PASSWORD_REQUIRED"));
        }
        if !verify_blocking(supplied.to_string(), expected_hash.clone()).await {
            return Err(AppError::Unauthorized("INVALID_CREDENTIALS"));
        }
    }

    if !verify_blocking(pin4.to_string(), pin_hash.clone()).await {
        return Err(AppError::Unauthorized("INVALID_CREDENTIALS"));
    }

    sqlx::query("UPDATE flats SET last_login_at = $1 WHERE flat_id = $2")
        .bind(Utc::now())
        .bind(flat_id.as_str())
        .execute(pool)
        .await?;

    Ok(LoginResult {
        flat_id: flat_id.into_string(),
    })
}
