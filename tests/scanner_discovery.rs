use async_trait::async_trait;
use rocketship_core::error::{AppError, AppResult};
use rocketship_core::github::{RepoHost, RepositoryInfo, TreeEntry};
use rocketship_core::refs;
use rocketship_core::scanner::{scan, ScanInput};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Filesystem-shaped stand-in for the GitHub tree API.
struct FakeRepoHost {
    default_branch: String,
    tree: Vec<TreeEntry>,
    files: HashMap<String, Vec<u8>>,
}

impl FakeRepoHost {
    fn new(paths: &[(&str, &str)], files: &[(&str, &str)]) -> Self {
        let tree = paths
            .iter()
            .map(|(path, kind)| TreeEntry {
                path: path.to_string(),
                kind: kind.to_string(),
                sha: format!("sha-{path}"),
                size: (*kind == "blob").then_some(64),
            })
            .collect();
        Self {
            default_branch: "main".into(),
            tree,
            files: files
                .iter()
                .map(|(path, body)| (path.to_string(), body.as_bytes().to_vec()))
                .collect(),
        }
    }
}

#[async_trait]
impl RepoHost for FakeRepoHost {
    async fn get_repository(
        &self,
        _installation_id: i64,
        _owner: &str,
        _repo: &str,
    ) -> AppResult<RepositoryInfo> {
        Ok(RepositoryInfo {
            default_branch: self.default_branch.clone(),
        })
    }

    async fn get_tree(
        &self,
        _installation_id: i64,
        _owner: &str,
        _repo: &str,
        _git_ref: &str,
    ) -> AppResult<Vec<TreeEntry>> {
        Ok(self.tree.clone())
    }

    async fn get_file_content(
        &self,
        _installation_id: i64,
        _owner: &str,
        _repo: &str,
        path: &str,
        _git_ref: &str,
    ) -> AppResult<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::Upstream(format!("no such file {path}")))
    }
}

async fn seed_org(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO organizations (id, name, slug) VALUES ($1, 'Acme', $2)")
        .bind(id)
        .bind(format!("acme-{id}"))
        .execute(pool)
        .await
        .unwrap();
    id
}

fn input_for(org: Uuid, repo: &str, git_ref: &str) -> ScanInput {
    ScanInput {
        organization_id: org,
        installation_id: 1001,
        repo_full_name: repo.to_string(),
        source_ref: refs::normalize(git_ref),
        head_sha: None,
        delivery_id: Uuid::new_v4().to_string(),
    }
}

const SUITE_A: &str = "
name: cart
description: cart flows
tests:
  - name: create
    steps:
      - plugin: http
        method: POST
  - name: list
    steps:
      - plugin: http
        method: GET
";

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn nested_directory_discovery(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = seed_org(&pool).await;
    let host = FakeRepoHost::new(
        &[
            ("sub", "tree"),
            ("sub/.rocketship", "tree"),
            ("sub/.rocketship/a.yaml", "blob"),
            ("README.md", "blob"),
        ],
        &[("sub/.rocketship/a.yaml", SUITE_A)],
    );
    let input = input_for(org, "acme/shop", "refs/heads/main");

    let attempt = scan(&pool, &host, &input).await.unwrap();
    assert_eq!(attempt.status, "success");
    assert_eq!(attempt.suites_found, 1);
    assert_eq!(attempt.tests_found, 2);
    assert_eq!(attempt.source_ref, "main");

    let project = sqlx::query("SELECT id, name, path_scope FROM projects WHERE organization_id = $1")
        .bind(org)
        .fetch_one(&pool)
        .await
        .unwrap();
    let name: String = project.get("name");
    let path_scope: Vec<String> = project.get("path_scope");
    assert_eq!(name, "shop-sub");
    assert_eq!(path_scope, vec!["sub/.rocketship/**"]);

    let suite = sqlx::query("SELECT id, name, file_path, test_count FROM suites")
        .fetch_one(&pool)
        .await
        .unwrap();
    let file_path: String = suite.get("file_path");
    let test_count: i32 = suite.get("test_count");
    assert_eq!(file_path, "sub/.rocketship/a.yaml");
    assert_eq!(test_count, 2);

    let mut test_names: Vec<String> = sqlx::query("SELECT name FROM tests")
        .fetch_all(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.get("name"))
        .collect();
    test_names.sort();
    assert_eq!(test_names, vec!["create", "list"]);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn rescans_are_idempotent(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = seed_org(&pool).await;
    let host = FakeRepoHost::new(
        &[(".rocketship", "tree"), (".rocketship/a.yaml", "blob")],
        &[(".rocketship/a.yaml", SUITE_A)],
    );

    scan(&pool, &host, &input_for(org, "acme/shop", "refs/heads/main"))
        .await
        .unwrap();
    let suite_ids: Vec<Uuid> = sqlx::query("SELECT id FROM suites")
        .fetch_all(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.get("id"))
        .collect();
    let test_ids: Vec<Uuid> = sqlx::query("SELECT id FROM tests ORDER BY name")
        .fetch_all(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.get("id"))
        .collect();

    scan(&pool, &host, &input_for(org, "acme/shop", "refs/heads/main"))
        .await
        .unwrap();

    let suite_ids_after: Vec<Uuid> = sqlx::query("SELECT id FROM suites")
        .fetch_all(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.get("id"))
        .collect();
    let test_ids_after: Vec<Uuid> = sqlx::query("SELECT id FROM tests ORDER BY name")
        .fetch_all(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.get("id"))
        .collect();
    assert_eq!(suite_ids, suite_ids_after);
    assert_eq!(test_ids, test_ids_after);

    let attempts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_attempts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(attempts, 2);
    let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(projects, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn repo_without_config_is_skipped(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = seed_org(&pool).await;
    let host = FakeRepoHost::new(&[("src", "tree"), ("src/main.rs", "blob")], &[]);

    let attempt = scan(&pool, &host, &input_for(org, "acme/shop", "refs/heads/main"))
        .await
        .unwrap();
    assert_eq!(attempt.status, "skipped");
    assert_eq!(attempt.suites_found, 0);
    let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(projects, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn broken_yaml_is_collected_not_fatal(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = seed_org(&pool).await;
    let host = FakeRepoHost::new(
        &[
            (".rocketship", "tree"),
            (".rocketship/bad.yaml", "blob"),
            (".rocketship/good.yaml", "blob"),
        ],
        &[
            (".rocketship/bad.yaml", "name: [unterminated"),
            (".rocketship/good.yaml", SUITE_A),
        ],
    );

    let attempt = scan(&pool, &host, &input_for(org, "acme/shop", "refs/heads/main"))
        .await
        .unwrap();
    assert_eq!(attempt.status, "error");
    assert!(attempt.error_message.contains("bad.yaml"));
    // The good file still landed.
    assert_eq!(attempt.suites_found, 1);
    assert_eq!(attempt.tests_found, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn malformed_repo_name_records_error(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = seed_org(&pool).await;
    let host = FakeRepoHost::new(&[], &[]);

    let attempt = scan(&pool, &host, &input_for(org, "not-a-full-name", "refs/heads/main"))
        .await
        .unwrap();
    assert_eq!(attempt.status, "error");
    assert!(attempt.error_message.contains("invalid repository name"));
}
