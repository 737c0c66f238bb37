use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::invites::{self, NewOrgInvite};
use crate::db::orgs;
use crate::error::{AppError, AppResult};
use crate::extractor::Principal;
use crate::mailer::Mailer;
use crate::secrets;

const INVITE_TTL_HOURS: i64 = 1;

fn default_role() -> String {
    "admin".into()
}

#[derive(Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
}

/// The plaintext code is echoed to the inviting admin once so it can also be
/// shared out of band; only hash and salt are stored.
#[derive(Debug, Serialize)]
pub struct CreateInviteResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct AcceptInviteRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptInviteResponse {
    pub organization_id: Uuid,
    pub organization_name: String,
}

/// POST /api/orgs/:org_id/invites. Admins of the target org only.
pub async fn create_invite(
    Extension(pool): Extension<PgPool>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    principal: Principal,
    Path(org_id): Path<Uuid>,
    Json(req): Json<CreateInviteRequest>,
) -> AppResult<(StatusCode, Json<CreateInviteResponse>)> {
    if !orgs::is_organization_admin(&pool, org_id, principal.user_id())
        .await
        .map_err(AppError::from)?
    {
        return Err(AppError::Forbidden(
            "owner role required for target organization".into(),
        ));
    }
    let email = req.email.trim().to_string();
    if !email.contains('@') {
        return Err(AppError::BadRequest("a valid invite email is required".into()));
    }
    if req.role != "admin" {
        return Err(AppError::BadRequest("only admin invites are supported".into()));
    }
    let org = orgs::get_organization(&pool, org_id)
        .await
        .map_err(AppError::from)?;
    let code = secrets::generate_numeric_code();
    let salt = secrets::generate_salt();
    let invite = invites::create_org_invite(
        &pool,
        &NewOrgInvite {
            organization_id: org.id,
            organization_name: org.name.clone(),
            email: email.clone(),
            role: req.role,
            code_hash: secrets::hash_code(&salt, &code),
            code_salt: salt.to_vec(),
            invited_by: principal.user_id(),
            expires_at: Utc::now() + Duration::hours(INVITE_TTL_HOURS),
        },
    )
    .await
    .map_err(AppError::from)?;
    mailer
        .send_invite_code(&email, &org.name, &code)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "invite mail failed");
            AppError::Upstream("invite mail could not be sent".into())
        })?;
    Ok((
        StatusCode::CREATED,
        Json(CreateInviteResponse {
            id: invite.id,
            organization_id: invite.organization_id,
            email: invite.email,
            role: invite.role,
            code,
            expires_at: invite.expires_at,
        }),
    ))
}

/// POST /api/orgs/invites/accept. Scans the caller's pending invites and
/// seats them as admin on the first live code match.
pub async fn accept_invite(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Json(req): Json<AcceptInviteRequest>,
) -> AppResult<Json<AcceptInviteResponse>> {
    let code = req.code.trim();
    if code.is_empty() {
        return Err(AppError::BadRequest("invite code is required".into()));
    }
    let pending = invites::find_pending_org_invites(&pool, principal.email())
        .await
        .map_err(AppError::from)?;
    let now = Utc::now();
    for invite in pending {
        if invite.expires_at <= now {
            continue;
        }
        let presented = secrets::hash_code(&invite.code_salt, code);
        if secrets::constant_time_eq(presented.as_bytes(), invite.code_hash.as_bytes()) {
            orgs::add_organization_admin(&pool, invite.organization_id, principal.user_id())
                .await
                .map_err(AppError::from)?;
            invites::mark_org_invite_accepted(&pool, invite.id)
                .await
                .map_err(AppError::from)?;
            return Ok(Json(AcceptInviteResponse {
                organization_id: invite.organization_id,
                organization_name: invite.organization_name,
            }));
        }
    }
    Err(AppError::NotFound)
}
