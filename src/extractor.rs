use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use uuid::Uuid;

use crate::config;
use crate::error::AppError;
use crate::signer::Signer;
use crate::token::{parse_access_token, AccessClaims};

/// Authenticated caller derived from a validated access token. Carries the
/// full claim set; role checks are case-insensitive.
pub struct Principal {
    pub claims: AccessClaims,
}

impl Principal {
    pub fn user_id(&self) -> Uuid {
        self.claims.user_id
    }

    pub fn email(&self) -> &str {
        &self.claims.email
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.claims.has_role(role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.claims.has_any_role(roles)
    }
}

fn bearer_or_cookie_token(parts: &Parts) -> Option<String> {
    if let Some(authz) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        if let Some(token) = authz
            .to_str()
            .ok()
            .and_then(|s| s.strip_prefix("Bearer "))
        {
            return Some(token.to_string());
        }
    }
    let cookie_header = parts.headers.get(axum::http::header::COOKIE)?;
    let cookies = cookie_header.to_str().unwrap_or("");
    cookies.split(';').find_map(|c| {
        c.trim()
            .strip_prefix("access_token=")
            .map(|s| s.to_string())
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_or_cookie_token(parts).ok_or(AppError::Unauthorized)?;
        let signer = parts
            .extensions
            .get::<Arc<Signer>>()
            .ok_or(AppError::Unauthorized)?
            .clone();
        let claims = parse_access_token(&signer, &token, &config::ISSUER, &config::AUDIENCE)
            .map_err(|_| AppError::Unauthorized)?;
        if claims.roles.is_empty() {
            return Err(AppError::Forbidden("no roles granted".into()));
        }
        Ok(Principal { claims })
    }
}
