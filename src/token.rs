use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::users::User;
use crate::error::{AppError, AppResult};
use crate::signer::Signer;

/// Typed access-token claim set. Only this serializer touches the JWT wire
/// shape; everything else works with the struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub user_id: Uuid,
    pub github_user_id: i64,
    pub exp: i64,
    pub iat: i64,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub preferred_username: String,
    pub scope: String,
    pub roles: Vec<String>,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
}

impl AccessClaims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// Mints a signed access token for `user`. Returns the compact JWS and the
/// claims it carries.
#[allow(clippy::too_many_arguments)]
pub fn mint_access_token(
    signer: &Signer,
    issuer: &str,
    audience: &str,
    ttl: std::time::Duration,
    user: &User,
    roles: Vec<String>,
    scope: &str,
    org_id: Option<Uuid>,
) -> AppResult<(String, AccessClaims)> {
    let now = Utc::now();
    let claims = AccessClaims {
        iss: issuer.to_string(),
        aud: audience.to_string(),
        sub: format!("user:{}", user.id),
        user_id: user.id,
        github_user_id: user.github_user_id,
        exp: (now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1)))
            .timestamp(),
        iat: now.timestamp(),
        email: user.email.clone(),
        email_verified: true,
        name: user.name.clone(),
        preferred_username: user.username.clone(),
        scope: scope.to_string(),
        roles,
        jti: Uuid::new_v4().to_string(),
        org_id,
    };
    let token = signer.sign(&claims)?;
    Ok((token, claims))
}

/// Validates signature and expiry, then issuer equality and (when present)
/// audience membership. Audience comparison is case-insensitive.
pub fn parse_access_token(
    signer: &Signer,
    token: &str,
    issuer: &str,
    audience: &str,
) -> AppResult<AccessClaims> {
    let header = decode_header(token).map_err(|_| AppError::Unauthorized)?;
    let key = match header.kid.as_deref() {
        Some(kid) => signer
            .decoding_key_for(kid)
            .map_err(|_| AppError::Unauthorized)?,
        None => signer.decoding_key(),
    };
    let validation = Validation::new(signer.algorithm());
    let data = decode::<AccessClaims>(token, key, &validation).map_err(|_| AppError::Unauthorized)?;
    let claims = data.claims;
    if claims.iss != issuer {
        return Err(AppError::Unauthorized);
    }
    if !claims.aud.is_empty() && !claims.aud.eq_ignore_ascii_case(audience) {
        return Err(AppError::Unauthorized);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rsa::pkcs8::EncodePrivateKey;
    use std::time::Duration;

    fn signer() -> Signer {
        let mut rng = rand::thread_rng();
        let key = rsa::RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
        let pem = key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();
        Signer::from_pem(&pem, "test-key").unwrap()
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            github_user_id: 42,
            email: "dev@example.com".into(),
            name: "Dev".into(),
            username: "dev".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn mint_and_parse_roundtrip() {
        let signer = signer();
        let user = user();
        let (token, minted) = mint_access_token(
            &signer,
            "https://auth.example.com",
            "rocketship",
            Duration::from_secs(3600),
            &user,
            vec!["owner".into()],
            "openid profile",
            None,
        )
        .unwrap();
        let parsed =
            parse_access_token(&signer, &token, "https://auth.example.com", "rocketship").unwrap();
        assert_eq!(parsed, minted);
        assert_eq!(parsed.sub, format!("user:{}", user.id));
        assert!(parsed.sub.starts_with("user:"));
    }

    #[test]
    fn wrong_issuer_rejected() {
        let signer = signer();
        let (token, _) = mint_access_token(
            &signer,
            "https://auth.example.com",
            "rocketship",
            Duration::from_secs(3600),
            &user(),
            vec!["owner".into()],
            "openid",
            None,
        )
        .unwrap();
        let err = parse_access_token(&signer, &token, "https://other.example.com", "rocketship");
        assert!(matches!(err, Err(AppError::Unauthorized)));
    }

    #[test]
    fn audience_compared_case_insensitively() {
        let signer = signer();
        let (token, _) = mint_access_token(
            &signer,
            "https://auth.example.com",
            "Rocketship",
            Duration::from_secs(3600),
            &user(),
            vec!["owner".into()],
            "openid",
            None,
        )
        .unwrap();
        assert!(
            parse_access_token(&signer, &token, "https://auth.example.com", "rocketship").is_ok()
        );
        assert!(
            parse_access_token(&signer, &token, "https://auth.example.com", "other").is_err()
        );
    }

    #[test]
    fn expired_token_rejected() {
        let signer = signer();
        let user = user();
        let now = Utc::now();
        let claims = AccessClaims {
            iss: "https://auth.example.com".into(),
            aud: "rocketship".into(),
            sub: format!("user:{}", user.id),
            user_id: user.id,
            github_user_id: user.github_user_id,
            exp: (now - chrono::Duration::hours(2)).timestamp(),
            iat: (now - chrono::Duration::hours(3)).timestamp(),
            email: user.email.clone(),
            email_verified: true,
            name: user.name.clone(),
            preferred_username: user.username.clone(),
            scope: "openid".into(),
            roles: vec!["owner".into()],
            jti: Uuid::new_v4().to_string(),
            org_id: None,
        };
        let token = signer.sign(&claims).unwrap();
        assert!(
            parse_access_token(&signer, &token, "https://auth.example.com", "rocketship").is_err()
        );
    }

    #[test]
    fn role_helpers_case_insensitive() {
        let signer = signer();
        let (_, claims) = mint_access_token(
            &signer,
            "iss",
            "aud",
            Duration::from_secs(60),
            &user(),
            vec!["owner".into(), "read".into()],
            "openid",
            None,
        )
        .unwrap();
        assert!(claims.has_role("OWNER"));
        assert!(claims.has_any_role(&["write", "read"]));
        assert!(!claims.has_any_role(&["write"]));
    }
}
