use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ============================================================================
// Flat lifecycle enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlatRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlatStatus {
    Active,
    Disabled,
}

// ============================================================================
// Database rows
//
// Status columns are stored as TEXT and fetched as plain `String`, then
// parsed into the enums above — sqlx's derive macro does not need to know
// about the enum, and a malformed row (which should never happen given the
// CHECK constraint in the migration) surfaces as a clear parse error rather
// than a silent default.
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FlatRequestRow {
    pub id: i64,
    pub flat_id: String,
    pub name: String,
    pub note: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FlatRow {
    pub flat_id: String,
    pub status: String,
    pub pin_hash: Option<String>,
    pub password_hash: Option<String>,
    pub strike_count: i32,
    pub ban_until: Option<DateTime<Utc>>,
    pub requires_admin_revoke: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SetupCodeRow {
    pub id: i64,
    pub flat_id: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub sid: String,
    pub flat_id: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AccessRequestResult {
    pub id: i64,
    pub status: FlatRequestStatus,
    pub reused: bool,
}

#[derive(Debug, Serialize)]
pub struct FlatRequestView {
    pub id: i64,
    pub status: FlatRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&FlatRequestRow> for FlatRequestView {
    fn from(row: &FlatRequestRow) -> Self {
        FlatRequestView {
            id: row.id,
            status: row.status.parse().unwrap_or(FlatRequestStatus::Pending),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlatView {
    pub status: FlatStatus,
    #[serde(rename = "pinSet")]
    pub pin_set: bool,
    pub banned: bool,
    #[serde(rename = "requiresAdminRevoke")]
    pub requires_admin_revoke: bool,
}

impl From<&FlatRow> for FlatView {
    fn from(row: &FlatRow) -> Self {
        FlatView {
            status: row.status.parse().unwrap_or(FlatStatus::Disabled),
            pin_set: row.pin_hash.is_some(),
            banned: row
                .ban_until
                .map(|until| until > Utc::now())
                .unwrap_or(false),
            requires_admin_revoke: row.requires_admin_revoke,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SetupStatusResponse {
    pub request: Option<FlatRequestView>,
    pub flat: Option<FlatView>,
}

#[derive(Debug, Serialize)]
pub struct LoginResult {
    pub flat_id: String,
}
