use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CiTokenStatus {
    Active,
    Revoked,
    Expired,
}

impl CiTokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiTokenStatus::Active => "active",
            CiTokenStatus::Revoked => "revoked",
            CiTokenStatus::Expired => "expired",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "revoked" => CiTokenStatus::Revoked,
            "expired" => CiTokenStatus::Expired,
            _ => CiTokenStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CiProjectScope {
    pub project_id: Uuid,
    pub scope: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CiToken {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: CiTokenStatus,
    pub never_expires: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub project_scopes: Vec<CiProjectScope>,
}

#[derive(Debug, Clone)]
pub struct NewCiToken {
    pub organization_id: Uuid,
    pub name: String,
    pub description: String,
    pub never_expires: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    /// sha256 of the opaque bearer; the plaintext is never stored.
    pub token_hash: String,
    pub project_scopes: Vec<CiProjectScope>,
}

fn map_token(row: &sqlx::postgres::PgRow, scopes: Vec<CiProjectScope>) -> CiToken {
    let status: String = row.get("status");
    CiToken {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        description: row.get("description"),
        status: CiTokenStatus::parse(&status),
        never_expires: row.get("never_expires"),
        expires_at: row.get("expires_at"),
        last_used_at: row.get("last_used_at"),
        created_by: row.get("created_by"),
        revoked_by: row.get("revoked_by"),
        revoked_at: row.get("revoked_at"),
        created_at: row.get("created_at"),
        project_scopes: scopes,
    }
}

const TOKEN_COLUMNS: &str = "id, organization_id, name, description, status, never_expires, \
     expires_at, last_used_at, created_by, revoked_by, revoked_at, created_at";

pub async fn create_ci_token(pool: &PgPool, input: &NewCiToken) -> StoreResult<CiToken> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(&format!(
        "INSERT INTO ci_tokens \
         (id, organization_id, name, description, status, never_expires, expires_at, \
          created_by, token_hash) \
         VALUES ($1, $2, $3, $4, 'active', $5, $6, $7, $8) \
         RETURNING {TOKEN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.organization_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.never_expires)
    .bind(input.expires_at)
    .bind(input.created_by)
    .bind(&input.token_hash)
    .fetch_one(&mut *tx)
    .await?;
    let token_id: Uuid = row.get("id");
    for scope in &input.project_scopes {
        sqlx::query(
            "INSERT INTO ci_token_project_scopes (ci_token_id, project_id, scope) \
             VALUES ($1, $2, $3)",
        )
        .bind(token_id)
        .bind(scope.project_id)
        .bind(&scope.scope)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(map_token(&row, input.project_scopes.clone()))
}

pub async fn list_ci_tokens(pool: &PgPool, organization_id: Uuid) -> StoreResult<Vec<CiToken>> {
    let rows = sqlx::query(&format!(
        "SELECT {TOKEN_COLUMNS} FROM ci_tokens \
         WHERE organization_id = $1 ORDER BY created_at DESC"
    ))
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    let mut tokens = Vec::with_capacity(rows.len());
    for row in rows {
        let token_id: Uuid = row.get("id");
        let scope_rows = sqlx::query(
            "SELECT project_id, scope FROM ci_token_project_scopes WHERE ci_token_id = $1",
        )
        .bind(token_id)
        .fetch_all(pool)
        .await?;
        let scopes = scope_rows
            .into_iter()
            .map(|r| CiProjectScope {
                project_id: r.get("project_id"),
                scope: r.get("scope"),
            })
            .collect();
        tokens.push(map_token(&row, scopes));
    }
    Ok(tokens)
}

pub async fn revoke_ci_token(
    pool: &PgPool,
    organization_id: Uuid,
    token_id: Uuid,
    revoked_by: Uuid,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE ci_tokens \
         SET status = 'revoked', revoked_by = $1, revoked_at = NOW() \
         WHERE id = $2 AND organization_id = $3 AND status = 'active'",
    )
    .bind(revoked_by)
    .bind(token_id)
    .bind(organization_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}
