use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct OrgInvite {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub organization_name: String,
    pub email: String,
    pub role: String,
    pub code_hash: String,
    pub code_salt: Vec<u8>,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOrgInvite {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub email: String,
    pub role: String,
    pub code_hash: String,
    pub code_salt: Vec<u8>,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
}

const INVITE_COLUMNS: &str = "id, organization_id, organization_name, email, role, code_hash, \
     code_salt, invited_by, expires_at, accepted_at";

fn map_invite(row: &sqlx::postgres::PgRow) -> OrgInvite {
    OrgInvite {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        organization_name: row.get("organization_name"),
        email: row.get("email"),
        role: row.get("role"),
        code_hash: row.get("code_hash"),
        code_salt: row.get("code_salt"),
        invited_by: row.get("invited_by"),
        expires_at: row.get("expires_at"),
        accepted_at: row.get("accepted_at"),
    }
}

pub async fn create_org_invite(pool: &PgPool, input: &NewOrgInvite) -> StoreResult<OrgInvite> {
    let row = sqlx::query(&format!(
        "INSERT INTO org_invites \
         (id, organization_id, organization_name, email, role, code_hash, code_salt, \
          invited_by, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {INVITE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.organization_id)
    .bind(&input.organization_name)
    .bind(&input.email)
    .bind(&input.role)
    .bind(&input.code_hash)
    .bind(&input.code_salt)
    .bind(input.invited_by)
    .bind(input.expires_at)
    .fetch_one(pool)
    .await?;
    Ok(map_invite(&row))
}

/// Invites for an address that have not been accepted yet, newest first.
/// Expiry is the caller's check; the code comparison needs the full record.
pub async fn find_pending_org_invites(pool: &PgPool, email: &str) -> StoreResult<Vec<OrgInvite>> {
    let rows = sqlx::query(&format!(
        "SELECT {INVITE_COLUMNS} FROM org_invites \
         WHERE lower(email) = lower($1) AND accepted_at IS NULL \
         ORDER BY expires_at DESC"
    ))
    .bind(email)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_invite).collect())
}

pub async fn mark_org_invite_accepted(pool: &PgPool, invite_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE org_invites SET accepted_at = NOW() WHERE id = $1 AND accepted_at IS NULL",
    )
    .bind(invite_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}
