use axum::{extract::Extension, http::StatusCode, Json};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::github::RepoHost;
use crate::refs;
use crate::scanner::{self, ScanInput};

/// Scan dispatch posted by the webhook receiver once it has resolved the
/// delivery to an organization.
#[derive(Debug, Deserialize)]
pub struct ScanWebhookRequest {
    pub organization_id: Uuid,
    pub installation_id: i64,
    pub repository_full_name: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub head_sha: Option<String>,
    #[serde(default)]
    pub delivery_id: Option<String>,
}

/// POST /webhooks/github. Accepts immediately; the scan runs detached and
/// records its own attempt row. Delivery retries are the sender's concern.
pub async fn scan_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(repo_host): Extension<Arc<dyn RepoHost>>,
    Json(payload): Json<ScanWebhookRequest>,
) -> Result<StatusCode, StatusCode> {
    let input = ScanInput {
        organization_id: payload.organization_id,
        installation_id: payload.installation_id,
        repo_full_name: payload.repository_full_name,
        source_ref: refs::normalize(&payload.git_ref),
        head_sha: payload.head_sha.filter(|sha| !sha.is_empty()),
        delivery_id: payload
            .delivery_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    };
    tokio::spawn(async move {
        if let Err(e) = scanner::scan(&pool, repo_host.as_ref(), &input).await {
            tracing::error!(error = %e, delivery_id = %input.delivery_id, "scan dispatch failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}
