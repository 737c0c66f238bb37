use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{ci_tokens, config, invites, members, oauth, registration, webhooks};

/// Credentialed CORS for the configured origin allowlist. The matching
/// origin is echoed back verbatim; no wildcard is ever sent.
pub fn cors_layer() -> CorsLayer {
    let allowed: Vec<HeaderValue> = config::ALLOWED_ORIGINS
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            allowed.iter().any(|allowed| allowed == origin)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/device/code", post(oauth::device_code))
        .route("/authorize", get(oauth::authorize))
        .route("/callback", get(oauth::callback))
        .route("/token", post(oauth::token))
        .route("/refresh", post(oauth::refresh))
        .route("/logout", post(oauth::logout))
        .route("/api/token", get(oauth::api_token))
        .route("/.well-known/jwks.json", get(oauth::jwks))
        .route("/healthz", get(oauth::healthz))
        .route("/api/me", get(oauth::me))
        .route(
            "/api/orgs/registration/start",
            post(registration::start),
        )
        .route(
            "/api/orgs/registration/resend",
            post(registration::resend),
        )
        .route(
            "/api/orgs/registration/complete",
            post(registration::complete),
        )
        .route("/api/orgs/:org_id/invites", post(invites::create_invite))
        .route("/api/orgs/invites/accept", post(invites::accept_invite))
        .route(
            "/api/projects/:project_id/members",
            get(members::list_members),
        )
        .route(
            "/api/projects/:project_id/members/:user_id",
            put(members::set_member_role).delete(members::remove_member),
        )
        .route(
            "/api/ci-tokens",
            get(ci_tokens::list_tokens).post(ci_tokens::create_token),
        )
        .route(
            "/api/ci-tokens/:token_id/revoke",
            post(ci_tokens::revoke_token),
        )
        .route("/webhooks/github", post(webhooks::scan_webhook))
}
