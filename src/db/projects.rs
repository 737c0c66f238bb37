use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{is_unique_violation, StoreError, StoreResult};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub repo_url: String,
    pub default_branch: String,
    pub path_scope: Vec<String>,
    pub source_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub organization_id: Uuid,
    pub name: String,
    pub repo_url: String,
    pub default_branch: String,
    pub path_scope: Vec<String>,
    pub source_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Read,
    Write,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Read => "read",
            MemberRole::Write => "write",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "read" => Some(MemberRole::Read),
            "write" => Some(MemberRole::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectMember {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROJECT_COLUMNS: &str =
    "id, organization_id, name, repo_url, default_branch, path_scope, source_ref, created_at";

fn map_project(row: &sqlx::postgres::PgRow) -> Project {
    Project {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        repo_url: row.get("repo_url"),
        default_branch: row.get("default_branch"),
        path_scope: row.get("path_scope"),
        source_ref: row.get("source_ref"),
        created_at: row.get("created_at"),
    }
}

/// Inserts a project; the `(organization, lower(name), lower(source_ref))`
/// uniqueness tuple makes a concurrent duplicate `AlreadyExists`.
pub async fn create_project(pool: &PgPool, input: &NewProject) -> StoreResult<Project> {
    let row = sqlx::query(&format!(
        "INSERT INTO projects \
         (id, organization_id, name, repo_url, default_branch, path_scope, source_ref) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {PROJECT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.organization_id)
    .bind(&input.name)
    .bind(&input.repo_url)
    .bind(&input.default_branch)
    .bind(&input.path_scope)
    .bind(&input.source_ref)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e, None) {
            StoreError::AlreadyExists
        } else {
            tracing::error!(?e, "DB error creating project");
            StoreError::Db(e)
        }
    })?;
    Ok(map_project(&row))
}

pub async fn project_name_exists(
    pool: &PgPool,
    organization_id: Uuid,
    name: &str,
    source_ref: &str,
) -> StoreResult<bool> {
    Ok(find_project_by_name(pool, organization_id, name, source_ref)
        .await?
        .is_some())
}

pub async fn find_project_by_name(
    pool: &PgPool,
    organization_id: Uuid,
    name: &str,
    source_ref: &str,
) -> StoreResult<Option<Project>> {
    let row = sqlx::query(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects \
         WHERE organization_id = $1 AND lower(name) = lower($2) \
           AND lower(source_ref) = lower($3)"
    ))
    .bind(organization_id)
    .bind(name)
    .bind(source_ref)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| map_project(&r)))
}

pub async fn list_projects(pool: &PgPool, organization_id: Uuid) -> StoreResult<Vec<Project>> {
    let rows = sqlx::query(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects \
         WHERE organization_id = $1 ORDER BY name, source_ref"
    ))
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_project).collect())
}

pub async fn project_organization_id(pool: &PgPool, project_id: Uuid) -> StoreResult<Uuid> {
    let org_id: Option<Uuid> =
        sqlx::query_scalar("SELECT organization_id FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(pool)
            .await?;
    org_id.ok_or(StoreError::NotFound)
}

pub async fn list_project_members(
    pool: &PgPool,
    project_id: Uuid,
) -> StoreResult<Vec<ProjectMember>> {
    let rows = sqlx::query(
        "SELECT m.user_id, u.username, u.email, m.role, m.joined_at, m.updated_at \
         FROM project_members m JOIN users u ON u.id = m.user_id \
         WHERE m.project_id = $1 ORDER BY m.joined_at",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| ProjectMember {
            user_id: r.get("user_id"),
            username: r.get("username"),
            email: r.get("email"),
            role: r.get("role"),
            joined_at: r.get("joined_at"),
            updated_at: r.get("updated_at"),
        })
        .collect())
}

pub async fn set_project_member_role(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
    role: MemberRole,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO project_members (project_id, user_id, role) VALUES ($1, $2, $3) \
         ON CONFLICT (project_id, user_id) \
         DO UPDATE SET role = EXCLUDED.role, updated_at = NOW()",
    )
    .bind(project_id)
    .bind(user_id)
    .bind(role.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_project_member(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM project_members WHERE project_id = $1 AND user_id = $2")
        .bind(project_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}
