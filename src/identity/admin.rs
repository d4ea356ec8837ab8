//! Admin-tooling helpers.
//!
//! Approving requests, issuing setup codes, and banning flats are owned by
//! the external admin tool (out of scope per the system overview); these
//! exist only so tests can set up fixtures without hand-writing SQL.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::error::AppResult;

const HASH_COST: u32 = 12;

pub async fn approve_request(pool: &PgPool, flat_id: &str) -> AppResult<()> {
    let now = Utc::now();
    sqlx::query("UPDATE flat_requests SET status = 'APPROVED', updated_at = $1 WHERE flat_id = $2")
        .bind(now)
        .bind(flat_id)
        .execute(pool)
        .await?;

    sqlx::query(
        "INSERT INTO flats (flat_id, status, strike_count, requires_admin_revoke, created_at, updated_at) \
         VALUES ($1, 'ACTIVE', 0, false, $2, $2) \
         ON CONFLICT (flat_id) DO NOTHING",
    )
    .bind(flat_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn issue_setup_code(pool: &PgPool, flat_id: &str, code: &str) -> AppResult<()> {
    let code = code.to_string();
    let code_hash = tokio::task::spawn_blocking(move || bcrypt::hash(code, HASH_COST))
        .await
        .map_err(|_| crate::error::AppError::Internal)?
        .map_err(|_| crate::error::AppError::Internal)?;
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO setup_codes (flat_id, code_hash, expires_at, created_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(flat_id)
    .bind(code_hash)
    .bind(now + Duration::minutes(30))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn ban_flat(pool: &PgPool, flat_id: &str, until: DateTime<Utc>) -> AppResult<()> {
    sqlx::query("UPDATE flats SET ban_until = $1, updated_at = $2 WHERE flat_id = $3")
        .bind(until)
        .bind(Utc::now())
        .bind(flat_id)
        .execute(pool)
        .await?;
    Ok(())
}
