use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::orgs;
use crate::db::projects::{self, MemberRole, ProjectMember};
use crate::error::{AppError, AppResult};
use crate::extractor::Principal;

/// Every member route requires the caller to be an admin of the project's
/// owning organization; any cross-org access is a 403.
async fn ensure_project_admin(
    pool: &PgPool,
    principal: &Principal,
    project_id: Uuid,
) -> AppResult<Uuid> {
    if !principal.has_role("owner") {
        return Err(AppError::Forbidden(
            "owner role required for target organization".into(),
        ));
    }
    let organization_id = projects::project_organization_id(pool, project_id)
        .await
        .map_err(AppError::from)?;
    if !orgs::is_organization_admin(pool, organization_id, principal.user_id())
        .await
        .map_err(AppError::from)?
    {
        return Err(AppError::Forbidden(
            "owner role required for target organization".into(),
        ));
    }
    Ok(organization_id)
}

/// GET /api/projects/:project_id/members
pub async fn list_members(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<ProjectMember>>> {
    ensure_project_admin(&pool, &principal, project_id).await?;
    let members = projects::list_project_members(&pool, project_id)
        .await
        .map_err(AppError::from)?;
    Ok(Json(members))
}

#[derive(Deserialize)]
pub struct SetMemberRoleRequest {
    pub role: String,
}

/// PUT /api/projects/:project_id/members/:user_id
pub async fn set_member_role(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetMemberRoleRequest>,
) -> AppResult<StatusCode> {
    ensure_project_admin(&pool, &principal, project_id).await?;
    let role = MemberRole::parse(&req.role)
        .ok_or_else(|| AppError::BadRequest("role must be read or write".into()))?;
    projects::set_project_member_role(&pool, project_id, user_id, role)
        .await
        .map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/projects/:project_id/members/:user_id
pub async fn remove_member(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    ensure_project_admin(&pool, &principal, project_id).await?;
    projects::remove_project_member(&pool, project_id, user_id)
        .await
        .map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
