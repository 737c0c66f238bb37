use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::StoreResult;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Suite {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: String,
    pub file_path: String,
    pub source_ref: String,
    pub test_count: i32,
}

#[derive(Debug, Clone)]
pub struct UpsertSuite<'a> {
    pub project_id: Uuid,
    pub name: &'a str,
    pub description: &'a str,
    pub file_path: &'a str,
    pub source_ref: &'a str,
    pub test_count: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Test {
    pub id: Uuid,
    pub suite_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub source_ref: String,
    pub step_count: i32,
}

#[derive(Debug, Clone)]
pub struct UpsertTest<'a> {
    pub suite_id: Uuid,
    pub project_id: Uuid,
    pub name: &'a str,
    pub source_ref: &'a str,
    pub step_count: i32,
}

/// Upserts on `(project_id, source_ref, file_path)`. Rescans refresh the
/// mutable fields and keep the original suite id.
pub async fn upsert_suite(pool: &PgPool, input: &UpsertSuite<'_>) -> StoreResult<Suite> {
    let row = sqlx::query(
        "INSERT INTO suites (id, project_id, name, description, file_path, source_ref, test_count) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (project_id, source_ref, file_path) DO UPDATE \
         SET name = EXCLUDED.name, description = EXCLUDED.description, \
             test_count = EXCLUDED.test_count \
         RETURNING id, project_id, name, description, file_path, source_ref, test_count",
    )
    .bind(Uuid::new_v4())
    .bind(input.project_id)
    .bind(input.name)
    .bind(input.description)
    .bind(input.file_path)
    .bind(input.source_ref)
    .bind(input.test_count)
    .fetch_one(pool)
    .await?;
    Ok(Suite {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        description: row.get("description"),
        file_path: row.get("file_path"),
        source_ref: row.get("source_ref"),
        test_count: row.get("test_count"),
    })
}

/// Upserts on `(suite_id, name, source_ref)`, keeping the stable test id.
pub async fn upsert_test(pool: &PgPool, input: &UpsertTest<'_>) -> StoreResult<Test> {
    let row = sqlx::query(
        "INSERT INTO tests (id, suite_id, project_id, name, source_ref, step_count) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (suite_id, name, source_ref) DO UPDATE \
         SET step_count = EXCLUDED.step_count \
         RETURNING id, suite_id, project_id, name, source_ref, step_count",
    )
    .bind(Uuid::new_v4())
    .bind(input.suite_id)
    .bind(input.project_id)
    .bind(input.name)
    .bind(input.source_ref)
    .bind(input.step_count)
    .fetch_one(pool)
    .await?;
    Ok(Test {
        id: row.get("id"),
        suite_id: row.get("suite_id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        source_ref: row.get("source_ref"),
        step_count: row.get("step_count"),
    })
}
