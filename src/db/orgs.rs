use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{is_unique_violation, StoreError, StoreResult};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

/// Lowercase kebab slug from an organization name. Runs of non-alphanumeric
/// characters collapse to a single dash; leading and trailing dashes are
/// trimmed.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Creates the organization and seats the creating user as its first admin,
/// in one transaction. A slug collision is `OrganizationSlugUsed`.
pub async fn create_organization(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    slug: &str,
) -> StoreResult<Organization> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        "INSERT INTO organizations (id, name, slug) VALUES ($1, $2, $3) \
         RETURNING id, name, slug, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(slug)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e, Some("organizations_slug_key")) {
            StoreError::OrganizationSlugUsed
        } else {
            tracing::error!(?e, "DB error creating organization");
            StoreError::Db(e)
        }
    })?;
    let org = Organization {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        created_at: row.get("created_at"),
    };
    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, is_admin) \
         VALUES ($1, $2, TRUE)",
    )
    .bind(org.id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(org)
}

pub async fn add_organization_admin(
    pool: &PgPool,
    organization_id: Uuid,
    user_id: Uuid,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, is_admin) \
         VALUES ($1, $2, TRUE) \
         ON CONFLICT (organization_id, user_id) DO UPDATE SET is_admin = TRUE",
    )
    .bind(organization_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn is_organization_admin(
    pool: &PgPool,
    organization_id: Uuid,
    user_id: Uuid,
) -> StoreResult<bool> {
    let is_admin: Option<bool> = sqlx::query_scalar(
        "SELECT is_admin FROM organization_members \
         WHERE organization_id = $1 AND user_id = $2",
    )
    .bind(organization_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(is_admin.unwrap_or(false))
}

pub async fn organization_slug_exists(pool: &PgPool, slug: &str) -> StoreResult<bool> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM organizations WHERE slug = $1")
        .bind(slug)
        .fetch_optional(pool)
        .await?;
    Ok(exists.is_some())
}

pub async fn get_organization(pool: &PgPool, organization_id: Uuid) -> StoreResult<Organization> {
    let row = sqlx::query("SELECT id, name, slug, created_at FROM organizations WHERE id = $1")
        .bind(organization_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(StoreError::NotFound);
    };
    Ok(Organization {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        created_at: row.get("created_at"),
    })
}
