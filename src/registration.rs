use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::orgs::{self, slugify, Organization};
use crate::db::registrations::{self, NewOrgRegistration, OrgRegistration};
use crate::db::users;
use crate::db::StoreError;
use crate::error::{AppError, AppResult};
use crate::extractor::Principal;
use crate::mailer::Mailer;
use crate::secrets;

const REGISTRATION_TTL_HOURS: i64 = 1;
const RESEND_COOLDOWN_MINUTES: i64 = 1;
const MAX_ATTEMPTS: i32 = 5;
const SLUG_ATTEMPTS: usize = 5;

#[derive(Deserialize)]
pub struct StartRegistrationRequest {
    pub name: String,
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResendRegistrationRequest {
    pub registration_id: Uuid,
}

#[derive(Deserialize)]
pub struct CompleteRegistrationRequest {
    pub registration_id: Uuid,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub id: Uuid,
    pub email: String,
    pub org_name: String,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

impl From<OrgRegistration> for RegistrationResponse {
    fn from(r: OrgRegistration) -> Self {
        Self {
            id: r.id,
            email: r.email,
            org_name: r.org_name,
            expires_at: r.expires_at,
            resend_available_at: r.resend_available_at,
        }
    }
}

fn fresh_code() -> (String, [u8; 16], String) {
    let code = secrets::generate_numeric_code();
    let salt = secrets::generate_salt();
    let hash = secrets::hash_code(&salt, &code);
    (code, salt, hash)
}

/// POST /api/orgs/registration/start. Only callers who do not already hold a
/// non-owner seat may begin; any earlier registration for the user is
/// superseded.
pub async fn start(
    Extension(pool): Extension<PgPool>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    principal: Principal,
    Json(req): Json<StartRegistrationRequest>,
) -> AppResult<(StatusCode, Json<RegistrationResponse>)> {
    if !principal.has_any_role(&["owner", "pending"]) {
        return Err(AppError::Forbidden(
            "owner or pending role required".into(),
        ));
    }
    let name = req.name.trim();
    let email = req.email.trim();
    if name.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest(
            "organization name and a valid email are required".into(),
        ));
    }
    registrations::delete_for_user(&pool, principal.user_id())
        .await
        .map_err(AppError::from)?;
    let (code, salt, hash) = fresh_code();
    let now = Utc::now();
    let registration = registrations::create(
        &pool,
        &NewOrgRegistration {
            user_id: principal.user_id(),
            email: email.to_string(),
            org_name: name.to_string(),
            code_hash: hash,
            code_salt: salt.to_vec(),
            max_attempts: MAX_ATTEMPTS,
            expires_at: now + Duration::hours(REGISTRATION_TTL_HOURS),
            resend_available_at: now + Duration::minutes(RESEND_COOLDOWN_MINUTES),
        },
    )
    .await
    .map_err(AppError::from)?;
    if let Err(e) = mailer.send_registration_code(email, name, &code).await {
        tracing::error!(error = %e, "registration mail failed; dropping registration");
        registrations::delete(&pool, registration.id)
            .await
            .map_err(AppError::from)?;
        return Err(AppError::Upstream("verification mail could not be sent".into()));
    }
    Ok((StatusCode::CREATED, Json(registration.into())))
}

/// POST /api/orgs/registration/resend.
pub async fn resend(
    Extension(pool): Extension<PgPool>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    principal: Principal,
    Json(req): Json<ResendRegistrationRequest>,
) -> AppResult<Json<RegistrationResponse>> {
    let registration = registrations::get(&pool, req.registration_id)
        .await
        .map_err(AppError::from)?;
    if registration.user_id != principal.user_id() {
        return Err(AppError::Forbidden("registration belongs to another user".into()));
    }
    let now = Utc::now();
    if registration.expires_at <= now {
        registrations::delete(&pool, registration.id)
            .await
            .map_err(AppError::from)?;
        return Err(AppError::Gone("registration expired".into()));
    }
    if registration.resend_available_at > now {
        return Err(AppError::TooManyRequests("resend not yet available".into()));
    }
    let (code, salt, hash) = fresh_code();
    let expires_at = now + Duration::hours(REGISTRATION_TTL_HOURS);
    let resend_available_at = now + Duration::minutes(RESEND_COOLDOWN_MINUTES);
    registrations::update_for_resend(&pool, registration.id, &hash, &salt, expires_at, resend_available_at)
        .await
        .map_err(AppError::from)?;
    mailer
        .send_registration_code(&registration.email, &registration.org_name, &code)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "registration resend mail failed");
            AppError::Upstream("verification mail could not be sent".into())
        })?;
    Ok(Json(RegistrationResponse {
        id: registration.id,
        email: registration.email,
        org_name: registration.org_name,
        expires_at,
        resend_available_at,
    }))
}

fn random_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

async fn create_org_with_slug(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
) -> AppResult<Organization> {
    let base = slugify(name);
    if base.is_empty() {
        return Err(AppError::BadRequest("organization name has no usable characters".into()));
    }
    let mut slug = base.clone();
    for _ in 0..SLUG_ATTEMPTS {
        match orgs::create_organization(pool, user_id, name, &slug).await {
            Ok(org) => return Ok(org),
            Err(StoreError::OrganizationSlugUsed) => {
                slug = format!("{base}-{}", random_suffix());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Conflict("organization slug already in use".into()))
}

/// POST /api/orgs/registration/complete. Constant-time code check, bounded
/// attempts, then the org goes live under a collision-free slug.
pub async fn complete(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Json(req): Json<CompleteRegistrationRequest>,
) -> AppResult<(StatusCode, Json<Organization>)> {
    let registration = registrations::get(&pool, req.registration_id)
        .await
        .map_err(AppError::from)?;
    if registration.user_id != principal.user_id() {
        return Err(AppError::Forbidden("registration belongs to another user".into()));
    }
    if registration.expires_at <= Utc::now() {
        registrations::delete(&pool, registration.id)
            .await
            .map_err(AppError::from)?;
        return Err(AppError::Gone("registration expired".into()));
    }
    let presented = secrets::hash_code(&registration.code_salt, req.code.trim());
    if !secrets::constant_time_eq(presented.as_bytes(), registration.code_hash.as_bytes()) {
        let attempts = registrations::increment_attempts(&pool, registration.id)
            .await
            .map_err(AppError::from)?;
        if attempts >= registration.max_attempts {
            registrations::delete(&pool, registration.id)
                .await
                .map_err(AppError::from)?;
            return Err(AppError::TooManyRequests("verification attempts exhausted".into()));
        }
        return Err(AppError::Unauthorized);
    }
    users::update_user_email(&pool, registration.user_id, &registration.email)
        .await
        .map_err(|e| match e {
            StoreError::EmailInUse => AppError::Conflict("email already in use".into()),
            other => AppError::from(other),
        })?;
    let org = create_org_with_slug(&pool, registration.user_id, &registration.org_name).await?;
    registrations::delete(&pool, registration.id)
        .await
        .map_err(AppError::from)?;
    Ok((StatusCode::CREATED, Json(org)))
}
