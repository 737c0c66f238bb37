use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Success,
    Error,
    Skipped,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Success => "success",
            ScanStatus::Error => "error",
            ScanStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanAttempt {
    pub id: Uuid,
    pub delivery_id: String,
    pub organization_id: Uuid,
    pub repository_full_name: String,
    pub source_ref: String,
    pub head_sha: String,
    pub status: String,
    pub suites_found: i32,
    pub tests_found: i32,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewScanAttempt {
    pub delivery_id: String,
    pub organization_id: Uuid,
    pub repository_full_name: String,
    pub source_ref: String,
    pub head_sha: String,
    pub status: ScanStatus,
    pub suites_found: i32,
    pub tests_found: i32,
    pub error_message: String,
}

pub async fn insert_scan_attempt(pool: &PgPool, input: &NewScanAttempt) -> StoreResult<ScanAttempt> {
    let row = sqlx::query(
        "INSERT INTO scan_attempts \
         (id, delivery_id, organization_id, repository_full_name, source_ref, head_sha, \
          status, suites_found, tests_found, error_message) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING id, delivery_id, organization_id, repository_full_name, source_ref, \
                   head_sha, status, suites_found, tests_found, error_message, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(&input.delivery_id)
    .bind(input.organization_id)
    .bind(&input.repository_full_name)
    .bind(&input.source_ref)
    .bind(&input.head_sha)
    .bind(input.status.as_str())
    .bind(input.suites_found)
    .bind(input.tests_found)
    .bind(&input.error_message)
    .fetch_one(pool)
    .await?;
    Ok(ScanAttempt {
        id: row.get("id"),
        delivery_id: row.get("delivery_id"),
        organization_id: row.get("organization_id"),
        repository_full_name: row.get("repository_full_name"),
        source_ref: row.get("source_ref"),
        head_sha: row.get("head_sha"),
        status: row.get("status"),
        suites_found: row.get("suites_found"),
        tests_found: row.get("tests_found"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    })
}
