use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::ci_tokens::{self, CiProjectScope, CiToken, NewCiToken};
use crate::db::projects::{self, MemberRole};
use crate::db::users;
use crate::error::{AppError, AppResult};
use crate::extractor::Principal;
use crate::secrets;

#[derive(Deserialize)]
pub struct ProjectScopeRequest {
    pub project_id: Uuid,
    pub scope: String,
}

#[derive(Deserialize)]
pub struct CreateCiTokenRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub never_expires: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub projects: Vec<ProjectScopeRequest>,
}

/// The opaque bearer appears in this response and nowhere else.
#[derive(Serialize)]
pub struct CreateCiTokenResponse {
    #[serde(flatten)]
    pub token: CiToken,
    pub plaintext: String,
}

/// Resolves the single admin org for the caller. CI tokens are org-owned;
/// the owner role plus an admin seat pins which org that is.
async fn admin_organization(pool: &PgPool, principal: &Principal) -> AppResult<Uuid> {
    if !principal.has_role("owner") {
        return Err(AppError::Forbidden("owner role required".into()));
    }
    let summary = users::role_summary(pool, principal.user_id())
        .await
        .map_err(AppError::from)?;
    summary
        .organizations
        .iter()
        .find(|o| o.is_admin)
        .map(|o| o.organization_id)
        .ok_or_else(|| AppError::Forbidden("owner role required".into()))
}

/// POST /api/ci-tokens. Validates every scoped project against the caller's
/// org, mints the opaque bearer, and returns the plaintext exactly once.
pub async fn create_token(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Json(req): Json<CreateCiTokenRequest>,
) -> AppResult<(StatusCode, Json<CreateCiTokenResponse>)> {
    let organization_id = admin_organization(&pool, &principal).await?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("token name is required".into()));
    }
    if !req.never_expires && req.expires_at.is_none() {
        return Err(AppError::BadRequest(
            "expires_at is required unless never_expires is set".into(),
        ));
    }
    let mut scopes = Vec::with_capacity(req.projects.len());
    for scope in &req.projects {
        let role = MemberRole::parse(&scope.scope)
            .ok_or_else(|| AppError::BadRequest("scope must be read or write".into()))?;
        let project_org = projects::project_organization_id(&pool, scope.project_id)
            .await
            .map_err(AppError::from)?;
        if project_org != organization_id {
            return Err(AppError::Forbidden(
                "project belongs to another organization".into(),
            ));
        }
        scopes.push(CiProjectScope {
            project_id: scope.project_id,
            scope: role.as_str().to_string(),
        });
    }
    let plaintext = secrets::generate_opaque_token();
    let token = ci_tokens::create_ci_token(
        &pool,
        &NewCiToken {
            organization_id,
            name: name.to_string(),
            description: req.description.trim().to_string(),
            never_expires: req.never_expires,
            expires_at: if req.never_expires { None } else { req.expires_at },
            created_by: principal.user_id(),
            token_hash: secrets::hash_token(&plaintext),
            project_scopes: scopes,
        },
    )
    .await
    .map_err(AppError::from)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateCiTokenResponse { token, plaintext }),
    ))
}

/// GET /api/ci-tokens. The plaintext is never listed.
pub async fn list_tokens(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
) -> AppResult<Json<Vec<CiToken>>> {
    let organization_id = admin_organization(&pool, &principal).await?;
    let tokens = ci_tokens::list_ci_tokens(&pool, organization_id)
        .await
        .map_err(AppError::from)?;
    Ok(Json(tokens))
}

/// POST /api/ci-tokens/:token_id/revoke
pub async fn revoke_token(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Path(token_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let organization_id = admin_organization(&pool, &principal).await?;
    ci_tokens::revoke_ci_token(&pool, organization_id, token_id, principal.user_id())
        .await
        .map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
