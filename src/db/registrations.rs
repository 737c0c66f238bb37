use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{StoreError, StoreResult};

/// Pending email-verified organization registration. Lifecycle: created by
/// start, refreshed by resend, removed on success, expiry, or attempt
/// exhaustion.
#[derive(Debug, Clone)]
pub struct OrgRegistration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub org_name: String,
    pub code_hash: String,
    pub code_salt: Vec<u8>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrgRegistration {
    pub user_id: Uuid,
    pub email: String,
    pub org_name: String,
    pub code_hash: String,
    pub code_salt: Vec<u8>,
    pub max_attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

fn map_registration(row: &sqlx::postgres::PgRow) -> OrgRegistration {
    OrgRegistration {
        id: row.get("id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        org_name: row.get("org_name"),
        code_hash: row.get("code_hash"),
        code_salt: row.get("code_salt"),
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        expires_at: row.get("expires_at"),
        resend_available_at: row.get("resend_available_at"),
    }
}

const REGISTRATION_COLUMNS: &str = "id, user_id, email, org_name, code_hash, code_salt, \
     attempts, max_attempts, expires_at, resend_available_at";

pub async fn create(pool: &PgPool, input: &NewOrgRegistration) -> StoreResult<OrgRegistration> {
    let row = sqlx::query(&format!(
        "INSERT INTO org_registrations \
         (id, user_id, email, org_name, code_hash, code_salt, attempts, max_attempts, \
          expires_at, resend_available_at) \
         VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $9) \
         RETURNING {REGISTRATION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.user_id)
    .bind(&input.email)
    .bind(&input.org_name)
    .bind(&input.code_hash)
    .bind(&input.code_salt)
    .bind(input.max_attempts)
    .bind(input.expires_at)
    .bind(input.resend_available_at)
    .fetch_one(pool)
    .await?;
    Ok(map_registration(&row))
}

pub async fn get(pool: &PgPool, id: Uuid) -> StoreResult<OrgRegistration> {
    let row = sqlx::query(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM org_registrations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| map_registration(&r)).ok_or(StoreError::NotFound)
}

pub async fn latest_for_user(pool: &PgPool, user_id: Uuid) -> StoreResult<Option<OrgRegistration>> {
    let row = sqlx::query(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM org_registrations \
         WHERE user_id = $1 ORDER BY expires_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| map_registration(&r)))
}

/// Swaps in a fresh code hash and pushes both TTL clocks forward.
pub async fn update_for_resend(
    pool: &PgPool,
    id: Uuid,
    code_hash: &str,
    code_salt: &[u8],
    expires_at: DateTime<Utc>,
    resend_available_at: DateTime<Utc>,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE org_registrations \
         SET code_hash = $1, code_salt = $2, attempts = 0, expires_at = $3, \
             resend_available_at = $4 \
         WHERE id = $5",
    )
    .bind(code_hash)
    .bind(code_salt)
    .bind(expires_at)
    .bind(resend_available_at)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Bumps the attempt counter and returns the incremented value.
pub async fn increment_attempts(pool: &PgPool, id: Uuid) -> StoreResult<i32> {
    let attempts: Option<i32> = sqlx::query_scalar(
        "UPDATE org_registrations SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    attempts.ok_or(StoreError::NotFound)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> StoreResult<()> {
    sqlx::query("DELETE FROM org_registrations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_for_user(pool: &PgPool, user_id: Uuid) -> StoreResult<()> {
    sqlx::query("DELETE FROM org_registrations WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
