use axum::extract::{Extension, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config;
use crate::db::refresh_tokens::{RefreshRecord, RefreshTokenStore};
use crate::db::users::{self, GithubProfile};
use crate::db::StoreError;
use crate::error::{AppError, AppResult, OauthError};
use crate::extractor::Principal;
use crate::github::{GithubClient, TokenError};
use crate::secrets;
use crate::sessions::{AuthSession, AuthSessions, DeviceSession, DeviceSessions};
use crate::signer::Signer;
use crate::token::mint_access_token;

const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const AUTH_SESSION_TTL_MINUTES: i64 = 10;

#[derive(Deserialize)]
pub struct DeviceCodeRequest {
    pub client_id: String,
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub device_code: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub scope: String,
}

struct IssuedTokens {
    body: TokenResponse,
    access_token: String,
    refresh_token: String,
}

fn forward_token_error(e: TokenError) -> AppError {
    AppError::Oauth(OauthError {
        error: e.error,
        error_description: e.error_description,
    })
}

fn split_scopes(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

/// Mints the access/refresh pair for an authenticated user and persists the
/// refresh record. Roles come from the store; a caller with no memberships
/// still gets a token, carrying only `pending`.
async fn issue_tokens(
    pool: &PgPool,
    refresh_store: &RefreshTokenStore,
    signer: &Signer,
    user: users::User,
    scopes: Vec<String>,
) -> AppResult<IssuedTokens> {
    let summary = users::role_summary(pool, user.id).await.map_err(AppError::from)?;
    let roles = summary.aggregated_roles();
    let org_id = summary
        .organizations
        .iter()
        .find(|o| o.is_admin)
        .map(|o| o.organization_id);
    let scope = scopes.join(" ");
    let (access_token, _claims) = mint_access_token(
        signer,
        &config::ISSUER,
        &config::AUDIENCE,
        *config::ACCESS_TTL,
        &user,
        roles,
        &scope,
        org_id,
    )?;
    let refresh_token = secrets::generate_opaque_token();
    let now = Utc::now();
    let record = RefreshRecord {
        token_id: Uuid::new_v4(),
        user,
        organization_id: org_id,
        scopes,
        issued_at: now,
        expires_at: now
            + Duration::from_std(*config::REFRESH_TTL).unwrap_or_else(|_| Duration::days(30)),
    };
    refresh_store
        .save(&refresh_token, &record)
        .await
        .map_err(AppError::from)?;
    Ok(IssuedTokens {
        body: TokenResponse {
            access_token: access_token.clone(),
            id_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            token_type: "Bearer",
            expires_in: config::ACCESS_TTL.as_secs(),
            scope,
        },
        access_token,
        refresh_token,
    })
}

/// Resolves the upstream identity into a local user. A profile without any
/// usable email is a policy denial.
async fn upsert_identity(pool: &PgPool, github: &GithubClient, access_token: &str) -> AppResult<users::User> {
    let upstream = github.fetch_user(access_token).await?;
    let email = upstream.email.unwrap_or_default();
    if email.is_empty() {
        return Err(AppError::Oauth(OauthError::access_denied(
            "no verified email available for this account",
        )));
    }
    let profile = GithubProfile {
        github_user_id: upstream.id,
        email,
        name: upstream.name.unwrap_or_else(|| upstream.login.clone()),
        username: upstream.login,
    };
    users::upsert_github_user(pool, &profile)
        .await
        .map_err(|e| match e {
            StoreError::EmailInUse => AppError::Oauth(OauthError::access_denied(
                "email is already associated with another account",
            )),
            other => AppError::from(other),
        })
}

fn cookie(name: &str, value: &str, max_age_secs: u64) -> String {
    let secure = if config::public_host_is_local() {
        ""
    } else {
        " Secure;"
    };
    format!("{name}={value}; HttpOnly;{secure} SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

fn auth_cookie_headers(access_token: &str, refresh_token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.append(
        header::SET_COOKIE,
        cookie("access_token", access_token, config::ACCESS_TTL.as_secs())
            .parse()
            .expect("valid header value"),
    );
    headers.append(
        header::SET_COOKIE,
        cookie("refresh_token", refresh_token, config::REFRESH_TTL.as_secs())
            .parse()
            .expect("valid header value"),
    );
    headers
}

fn clear_cookie_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in ["access_token", "refresh_token"] {
        headers.append(
            header::SET_COOKIE,
            format!("{name}=deleted; HttpOnly; Path=/; Max-Age=0")
                .parse()
                .expect("valid header value"),
        );
    }
    headers
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|c| {
        c.trim()
            .strip_prefix(&format!("{name}="))
            .map(|v| v.to_string())
    })
}

/// POST /device/code. Starts the device flow for the configured client.
pub async fn device_code(
    Extension(github): Extension<Arc<GithubClient>>,
    Extension(device_sessions): Extension<Arc<DeviceSessions>>,
    Form(req): Form<DeviceCodeRequest>,
) -> AppResult<Json<crate::github::DeviceCodeResponse>> {
    if !req.client_id.eq_ignore_ascii_case(&config::CLIENT_ID) {
        return Err(AppError::Oauth(OauthError::unauthorized_client()));
    }
    let upstream = github.request_device_code(&config::GITHUB_SCOPES).await?;
    device_sessions.insert(
        upstream.device_code.clone(),
        DeviceSession {
            client_id: req.client_id,
            scopes: split_scopes(&config::SCOPES),
            expires_at: Utc::now() + Duration::seconds(upstream.expires_in as i64),
        },
    );
    Ok(Json(upstream))
}

/// GET /authorize. Stores the PKCE session and bounces to upstream consent
/// with this broker's callback substituted as the redirect target.
pub async fn authorize(
    Extension(auth_sessions): Extension<Arc<AuthSessions>>,
    Query(q): Query<AuthorizeQuery>,
) -> AppResult<Redirect> {
    if q.redirect_uri.is_empty() || q.state.is_empty() || q.code_challenge.is_empty() {
        return Err(AppError::Oauth(OauthError::invalid_request(
            "redirect_uri, state and code_challenge are required",
        )));
    }
    if q.code_challenge_method != "S256" {
        return Err(AppError::Oauth(OauthError::invalid_request(
            "code_challenge_method must be S256",
        )));
    }
    let scopes = q
        .scope
        .as_deref()
        .map(split_scopes)
        .unwrap_or_else(|| split_scopes(&config::SCOPES));
    auth_sessions.insert(AuthSession {
        state: q.state.clone(),
        code_challenge: q.code_challenge,
        redirect_uri: q.redirect_uri,
        scopes,
        expires_at: Utc::now() + Duration::minutes(AUTH_SESSION_TTL_MINUTES),
    });
    let callback = format!("{}/callback", config::PUBLIC_BASE_URL.trim_end_matches('/'));
    let upstream = url::Url::parse_with_params(
        &config::GITHUB_AUTHORIZE_URL,
        &[
            ("client_id", config::GITHUB_CLIENT_ID.as_str()),
            ("redirect_uri", callback.as_str()),
            ("scope", config::GITHUB_SCOPES.as_str()),
            ("state", q.state.as_str()),
        ],
    )
    .map_err(|e| AppError::Message(format!("authorize url build failed: {e}")))?;
    Ok(Redirect::temporary(upstream.as_str()))
}

/// GET /callback. Completes the upstream hop: single-use state lookup, then
/// a redirect back to the client with `code` and `state` attached.
pub async fn callback(
    Extension(auth_sessions): Extension<Arc<AuthSessions>>,
    Query(cb): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = cb.error {
        let description = cb.error_description.unwrap_or_default();
        return (
            StatusCode::BAD_REQUEST,
            format!("upstream authorization failed: {error} {description}"),
        )
            .into_response();
    }
    let Some(state) = cb.state else {
        return (StatusCode::BAD_REQUEST, "missing state".to_string()).into_response();
    };
    let Some(session) = auth_sessions.take(&state) else {
        return (
            StatusCode::BAD_REQUEST,
            "unknown or expired authorization session".to_string(),
        )
            .into_response();
    };
    let Some(code) = cb.code else {
        return (StatusCode::BAD_REQUEST, "missing code".to_string()).into_response();
    };
    let target = match url::Url::parse_with_params(
        &session.redirect_uri,
        &[("code", code.as_str()), ("state", state.as_str())],
    ) {
        Ok(url) => url,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "invalid redirect_uri".to_string()).into_response()
        }
    };
    Redirect::temporary(target.as_str()).into_response()
}

/// POST /token. Multiplexed grant endpoint.
pub async fn token(
    Extension(pool): Extension<PgPool>,
    Extension(github): Extension<Arc<GithubClient>>,
    Extension(signer): Extension<Arc<Signer>>,
    Extension(refresh_store): Extension<RefreshTokenStore>,
    Extension(device_sessions): Extension<Arc<DeviceSessions>>,
    Form(req): Form<TokenRequest>,
) -> AppResult<Response> {
    match req.grant_type.as_str() {
        DEVICE_GRANT => {
            let issued = device_grant(&pool, &github, &signer, &refresh_store, &device_sessions, &req)
                .await?;
            Ok(Json(issued.body).into_response())
        }
        "authorization_code" => {
            let issued = auth_code_grant(&pool, &github, &signer, &refresh_store, &req).await?;
            let headers = auth_cookie_headers(&issued.access_token, &issued.refresh_token);
            Ok((headers, Json(issued.body)).into_response())
        }
        "refresh_token" => {
            let refresh_token = req
                .refresh_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    AppError::Oauth(OauthError::invalid_request("refresh_token is required"))
                })?;
            let issued = refresh_grant(&pool, &signer, &refresh_store, refresh_token).await?;
            Ok(Json(issued.body).into_response())
        }
        _ => Err(AppError::Oauth(OauthError::unsupported_grant_type())),
    }
}

async fn device_grant(
    pool: &PgPool,
    github: &GithubClient,
    signer: &Signer,
    refresh_store: &RefreshTokenStore,
    device_sessions: &DeviceSessions,
    req: &TokenRequest,
) -> AppResult<IssuedTokens> {
    if let Some(client_id) = req.client_id.as_deref() {
        if !client_id.eq_ignore_ascii_case(&config::CLIENT_ID) {
            return Err(AppError::Oauth(OauthError::unauthorized_client()));
        }
    }
    let device_code = req.device_code.as_deref().filter(|c| !c.is_empty()).ok_or_else(|| {
        AppError::Oauth(OauthError::invalid_request("device_code is required"))
    })?;
    let Some(session) = device_sessions.get(device_code) else {
        return Err(AppError::Oauth(OauthError::authorization_pending()));
    };
    let upstream = github
        .exchange_device_code(device_code)
        .await?
        .map_err(forward_token_error)?;
    let user = upsert_identity(pool, github, &upstream.access_token).await?;
    let issued = issue_tokens(pool, refresh_store, signer, user, session.scopes).await?;
    device_sessions.remove(device_code);
    Ok(issued)
}

async fn auth_code_grant(
    pool: &PgPool,
    github: &GithubClient,
    signer: &Signer,
    refresh_store: &RefreshTokenStore,
    req: &TokenRequest,
) -> AppResult<IssuedTokens> {
    let code = req.code.as_deref().filter(|c| !c.is_empty()).ok_or_else(|| {
        AppError::Oauth(OauthError::invalid_request("code is required"))
    })?;
    let redirect_uri = req.redirect_uri.as_deref().unwrap_or_default();
    let code_verifier = req
        .code_verifier
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::Oauth(OauthError::invalid_request("code_verifier is required"))
        })?;
    let upstream = github
        .exchange_authorization_code(code, redirect_uri, code_verifier)
        .await?
        .map_err(|e| {
            AppError::Oauth(OauthError {
                error: "invalid_grant".into(),
                error_description: Some(e.error_description.unwrap_or(e.error)),
            })
        })?;
    let user = upsert_identity(pool, github, &upstream.access_token).await?;
    issue_tokens(pool, refresh_store, signer, user, split_scopes(&config::SCOPES)).await
}

/// Rotation per the store's transactional delete-then-insert: a token that
/// loses the race, has expired, or belongs to a user reduced to `pending`
/// is an `invalid_grant`.
async fn refresh_grant(
    pool: &PgPool,
    signer: &Signer,
    refresh_store: &RefreshTokenStore,
    refresh_token: &str,
) -> AppResult<IssuedTokens> {
    let invalid = || AppError::Oauth(OauthError::invalid_grant("refresh token is not valid"));
    let record = match refresh_store.get(refresh_token).await {
        Ok(record) => record,
        Err(StoreError::RefreshTokenNotFound) => return Err(invalid()),
        Err(e) => return Err(e.into()),
    };
    if record.expires_at <= Utc::now() {
        let _ = refresh_store.delete(refresh_token).await;
        return Err(invalid());
    }
    let user = match users::get_user(pool, record.user.id).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            let _ = refresh_store.delete(refresh_token).await;
            return Err(invalid());
        }
        Err(e) => return Err(e.into()),
    };
    let summary = users::role_summary(pool, user.id).await.map_err(AppError::from)?;
    let roles = summary.aggregated_roles();
    if roles == ["pending"] {
        let _ = refresh_store.delete(refresh_token).await;
        return Err(invalid());
    }
    let org_id = summary
        .organizations
        .iter()
        .find(|o| o.is_admin)
        .map(|o| o.organization_id);
    let scope = record.scopes.join(" ");
    let (access_token, _claims) = mint_access_token(
        signer,
        &config::ISSUER,
        &config::AUDIENCE,
        *config::ACCESS_TTL,
        &user,
        roles,
        &scope,
        org_id,
    )?;
    let new_refresh = secrets::generate_opaque_token();
    let now = Utc::now();
    let new_record = RefreshRecord {
        token_id: Uuid::new_v4(),
        user,
        organization_id: org_id,
        scopes: record.scopes,
        issued_at: now,
        expires_at: now
            + Duration::from_std(*config::REFRESH_TTL).unwrap_or_else(|_| Duration::days(30)),
    };
    match refresh_store.rotate(refresh_token, &new_refresh, &new_record).await {
        Ok(()) => {}
        Err(StoreError::RefreshTokenNotFound) => return Err(invalid()),
        Err(e) => return Err(e.into()),
    }
    Ok(IssuedTokens {
        body: TokenResponse {
            access_token: access_token.clone(),
            id_token: access_token.clone(),
            refresh_token: new_refresh.clone(),
            token_type: "Bearer",
            expires_in: config::ACCESS_TTL.as_secs(),
            scope,
        },
        access_token,
        refresh_token: new_refresh,
    })
}

/// POST /refresh. Refresh-only alias of /token.
pub async fn refresh(
    Extension(pool): Extension<PgPool>,
    Extension(signer): Extension<Arc<Signer>>,
    Extension(refresh_store): Extension<RefreshTokenStore>,
    Form(req): Form<RefreshRequest>,
) -> AppResult<Response> {
    if let Some(grant_type) = req.grant_type.as_deref() {
        if grant_type != "refresh_token" {
            return Err(AppError::Oauth(OauthError::unsupported_grant_type()));
        }
    }
    let refresh_token = req
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Oauth(OauthError::invalid_request("refresh_token is required")))?;
    let issued = refresh_grant(&pool, &signer, &refresh_store, refresh_token).await?;
    Ok(Json(issued.body).into_response())
}

/// POST /logout. Revokes the cookie-held refresh token and clears cookies.
pub async fn logout(
    Extension(refresh_store): Extension<RefreshTokenStore>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if let Some(refresh_token) = cookie_value(&headers, "refresh_token") {
        if let Err(e) = refresh_store.delete(&refresh_token).await {
            if !matches!(e, StoreError::RefreshTokenNotFound) {
                return Err(e.into());
            }
        }
    }
    Ok((clear_cookie_headers(), Json(serde_json::json!({"ok": true}))).into_response())
}

#[derive(Serialize)]
pub struct ApiTokenResponse {
    pub access_token: String,
    pub expires_at: i64,
}

/// GET /api/token. Same-origin cookie exchange for browser clients: returns
/// a live access token, transparently rotating through the refresh cookie
/// when the access cookie is absent or stale.
pub async fn api_token(
    Extension(pool): Extension<PgPool>,
    Extension(signer): Extension<Arc<Signer>>,
    Extension(refresh_store): Extension<RefreshTokenStore>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if let Some(access_token) = cookie_value(&headers, "access_token") {
        if let Ok(claims) = crate::token::parse_access_token(
            &signer,
            &access_token,
            &config::ISSUER,
            &config::AUDIENCE,
        ) {
            return Ok(Json(ApiTokenResponse {
                access_token,
                expires_at: claims.exp,
            })
            .into_response());
        }
    }
    let Some(refresh_token) = cookie_value(&headers, "refresh_token") else {
        return Err(AppError::Unauthorized);
    };
    let issued = refresh_grant(&pool, &signer, &refresh_store, &refresh_token)
        .await
        .map_err(|_| AppError::Unauthorized)?;
    let expires_at = (Utc::now()
        + Duration::from_std(*config::ACCESS_TTL).unwrap_or_else(|_| Duration::hours(1)))
    .timestamp();
    let headers = auth_cookie_headers(&issued.access_token, &issued.refresh_token);
    Ok((
        headers,
        Json(ApiTokenResponse {
            access_token: issued.access_token,
            expires_at,
        }),
    )
        .into_response())
}

/// GET /.well-known/jwks.json
pub async fn jwks(Extension(signer): Extension<Arc<Signer>>) -> Json<crate::signer::JwksDocument> {
    Json(signer.jwks())
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub username: String,
    pub roles: Vec<String>,
}

/// GET /api/me
pub async fn me(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
) -> AppResult<Json<MeResponse>> {
    let user = users::get_user(&pool, principal.user_id())
        .await
        .map_err(AppError::from)?;
    let summary = users::role_summary(&pool, user.id)
        .await
        .map_err(AppError::from)?;
    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        username: user.username,
        roles: summary.aggregated_roles(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_splitting() {
        assert_eq!(
            split_scopes("openid  profile email"),
            vec!["openid", "profile", "email"]
        );
        assert!(split_scopes("").is_empty());
    }

    #[test]
    fn cookies_follow_local_host_rule() {
        std::env::set_var("PUBLIC_BASE_URL", "http://localhost:8000");
        let c = cookie("access_token", "abc", 3600);
        assert!(c.contains("HttpOnly"));
        assert!(c.contains("SameSite=Lax"));
        assert!(!c.contains("Secure"));
        assert!(c.ends_with("Max-Age=3600"));
    }

    #[test]
    fn cookie_values_parsed_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; refresh_token=r-1; access_token=a-1".parse().unwrap(),
        );
        assert_eq!(cookie_value(&headers, "refresh_token").as_deref(), Some("r-1"));
        assert_eq!(cookie_value(&headers, "access_token").as_deref(), Some("a-1"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
