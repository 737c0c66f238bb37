use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{is_unique_violation, StoreError, StoreResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub github_user_id: i64,
    pub email: String,
    pub name: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upstream profile asserted by GitHub on login.
#[derive(Debug, Clone)]
pub struct GithubProfile {
    pub github_user_id: i64,
    pub email: String,
    pub name: String,
    pub username: String,
}

fn map_user(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        github_user_id: row.get("github_user_id"),
        email: row.get("email"),
        name: row.get("name"),
        username: row.get("username"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Creates the user on first login, refreshes profile fields on every later
/// one. A profile email that collides with a different local user is
/// `EmailInUse`.
pub async fn upsert_github_user(pool: &PgPool, profile: &GithubProfile) -> StoreResult<User> {
    let row = sqlx::query(
        "INSERT INTO users (id, github_user_id, email, name, username) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (github_user_id) DO UPDATE \
         SET email = EXCLUDED.email, name = EXCLUDED.name, \
             username = EXCLUDED.username, updated_at = NOW() \
         RETURNING id, github_user_id, email, name, username, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(profile.github_user_id)
    .bind(&profile.email)
    .bind(&profile.name)
    .bind(&profile.username)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e, Some("users_email_key")) {
            StoreError::EmailInUse
        } else {
            tracing::error!(?e, "DB error upserting github user");
            StoreError::Db(e)
        }
    })?;
    Ok(map_user(&row))
}

pub async fn get_user(pool: &PgPool, user_id: Uuid) -> StoreResult<User> {
    let row = sqlx::query(
        "SELECT id, github_user_id, email, name, username, created_at, updated_at \
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| map_user(&r)).ok_or(StoreError::NotFound)
}

pub async fn update_user_email(pool: &PgPool, user_id: Uuid, email: &str) -> StoreResult<()> {
    let result = sqlx::query("UPDATE users SET email = $1, updated_at = NOW() WHERE id = $2")
        .bind(email)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, Some("users_email_key")) {
                StoreError::EmailInUse
            } else {
                tracing::error!(?e, "DB error updating user email");
                StoreError::Db(e)
            }
        })?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgRole {
    pub organization_id: Uuid,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectRole {
    pub project_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleSummary {
    pub organizations: Vec<OrgRole>,
    pub projects: Vec<ProjectRole>,
}

impl RoleSummary {
    /// Deduplicated lowercase role list: `owner` for any org admin seat, the
    /// project role per membership, `pending` only when the user belongs to
    /// nothing. Sorted for determinism.
    pub fn aggregated_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        if self.organizations.iter().any(|o| o.is_admin) {
            roles.push("owner".into());
        }
        for project in &self.projects {
            roles.push(project.role.to_lowercase());
        }
        if self.organizations.is_empty() && self.projects.is_empty() {
            roles.push("pending".into());
        }
        roles.sort();
        roles.dedup();
        roles
    }
}

pub async fn role_summary(pool: &PgPool, user_id: Uuid) -> StoreResult<RoleSummary> {
    let org_rows = sqlx::query(
        "SELECT organization_id, is_admin FROM organization_members WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    let project_rows = sqlx::query(
        "SELECT m.project_id, p.organization_id, m.role \
         FROM project_members m JOIN projects p ON p.id = m.project_id \
         WHERE m.user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(RoleSummary {
        organizations: org_rows
            .into_iter()
            .map(|r| OrgRole {
                organization_id: r.get("organization_id"),
                is_admin: r.get("is_admin"),
            })
            .collect(),
        projects: project_rows
            .into_iter()
            .map(|r| ProjectRole {
                project_id: r.get("project_id"),
                organization_id: r.get("organization_id"),
                role: r.get("role"),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(admin: bool) -> OrgRole {
        OrgRole {
            organization_id: Uuid::new_v4(),
            is_admin: admin,
        }
    }

    fn project(role: &str) -> ProjectRole {
        ProjectRole {
            project_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            role: role.into(),
        }
    }

    #[test]
    fn admin_seat_yields_owner() {
        let summary = RoleSummary {
            organizations: vec![org(false), org(true)],
            projects: vec![],
        };
        assert_eq!(summary.aggregated_roles(), vec!["owner"]);
    }

    #[test]
    fn project_roles_lowercased_and_deduplicated() {
        let summary = RoleSummary {
            organizations: vec![],
            projects: vec![project("Write"), project("read"), project("write")],
        };
        assert_eq!(summary.aggregated_roles(), vec!["read", "write"]);
    }

    #[test]
    fn no_memberships_means_pending() {
        let summary = RoleSummary::default();
        assert_eq!(summary.aggregated_roles(), vec!["pending"]);
    }

    #[test]
    fn non_admin_org_member_gets_no_synthetic_role() {
        let summary = RoleSummary {
            organizations: vec![org(false)],
            projects: vec![],
        };
        assert!(summary.aggregated_roles().is_empty());
    }

    #[test]
    fn combined_roles_sorted() {
        let summary = RoleSummary {
            organizations: vec![org(true)],
            projects: vec![project("write"), project("read")],
        };
        assert_eq!(summary.aggregated_roles(), vec!["owner", "read", "write"]);
    }
}
