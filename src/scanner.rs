use sqlx::PgPool;
use uuid::Uuid;

use crate::db::projects::{self, NewProject, Project};
use crate::db::scans::{self, NewScanAttempt, ScanAttempt, ScanStatus};
use crate::db::suites::{self, UpsertSuite, UpsertTest};
use crate::db::StoreError;
use crate::dsl;
use crate::error::{AppError, AppResult};
use crate::github::{RepoHost, TreeEntry};
use crate::refs::NormalizedRef;

const ROCKETSHIP_DIR: &str = ".rocketship";

/// One scan request for an `(org, repo, ref)` triple, usually derived from a
/// webhook delivery.
#[derive(Debug, Clone)]
pub struct ScanInput {
    pub organization_id: Uuid,
    pub installation_id: i64,
    pub repo_full_name: String,
    pub source_ref: NormalizedRef,
    pub head_sha: Option<String>,
    pub delivery_id: String,
}

fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let mut parts = full_name.splitn(2, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

/// Collects `.rocketship` directory paths from a recursive tree listing.
/// Directories appear either as tree entries or, when the tree omits them,
/// as the parent of a blob directly inside one.
fn collect_rocketship_dirs(entries: &[TreeEntry]) -> Vec<String> {
    let mut dirs: Vec<String> = Vec::new();
    for entry in entries {
        let candidate = if entry.kind == "tree" {
            let is_rocketship = entry.path == ROCKETSHIP_DIR
                || entry.path.ends_with(&format!("/{ROCKETSHIP_DIR}"));
            is_rocketship.then(|| entry.path.clone())
        } else if entry.kind == "blob" {
            entry.path.rsplit_once('/').and_then(|(parent, _)| {
                let basename = parent.rsplit('/').next().unwrap_or(parent);
                (basename == ROCKETSHIP_DIR).then(|| parent.to_string())
            })
        } else {
            None
        };
        if let Some(dir) = candidate {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs.sort();
    dirs
}

/// Stable project name for a discovered config directory: the repo name for
/// the root `.rocketship`, `repo-sub-dir` for nested ones.
fn project_name_for(repo: &str, dir: &str) -> String {
    match dir.strip_suffix(ROCKETSHIP_DIR) {
        Some("") => repo.to_string(),
        Some(parent) => {
            let parent = parent.trim_end_matches('/');
            format!("{repo}-{}", parent.replace('/', "-"))
        }
        None => repo.to_string(),
    }
}

/// YAML files directly inside the directory, not in nested subdirectories.
fn yaml_files_in(entries: &[TreeEntry], dir: &str) -> Vec<String> {
    let prefix = format!("{dir}/");
    let mut files: Vec<String> = entries
        .iter()
        .filter(|e| e.kind == "blob")
        .filter_map(|e| {
            let rest = e.path.strip_prefix(&prefix)?;
            if rest.contains('/') {
                return None;
            }
            (rest.ends_with(".yaml") || rest.ends_with(".yml")).then(|| e.path.clone())
        })
        .collect();
    files.sort();
    files
}

async fn find_or_create_project(
    pool: &PgPool,
    input: &ScanInput,
    repo: &str,
    default_branch: &str,
    dir: &str,
) -> AppResult<Project> {
    let name = project_name_for(repo, dir);
    let source_ref = &input.source_ref.ref_name;
    if let Some(existing) =
        projects::find_project_by_name(pool, input.organization_id, &name, source_ref)
            .await
            .map_err(AppError::from)?
    {
        return Ok(existing);
    }
    let new_project = NewProject {
        organization_id: input.organization_id,
        name: name.clone(),
        repo_url: format!("https://github.com/{}", input.repo_full_name),
        default_branch: default_branch.to_string(),
        path_scope: vec![format!("{dir}/**")],
        source_ref: source_ref.clone(),
    };
    match projects::create_project(pool, &new_project).await {
        Ok(project) => Ok(project),
        // A concurrent scan of the same triple can win the insert; the
        // uniqueness tuple makes the recovery read safe.
        Err(StoreError::AlreadyExists) => {
            projects::find_project_by_name(pool, input.organization_id, &name, source_ref)
                .await
                .map_err(AppError::from)?
                .ok_or_else(|| AppError::Message("project vanished after create race".into()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn record_attempt(
    pool: &PgPool,
    input: &ScanInput,
    status: ScanStatus,
    suites_found: i32,
    tests_found: i32,
    error_message: String,
) -> AppResult<ScanAttempt> {
    scans::insert_scan_attempt(
        pool,
        &NewScanAttempt {
            delivery_id: input.delivery_id.clone(),
            organization_id: input.organization_id,
            repository_full_name: input.repo_full_name.clone(),
            source_ref: input.source_ref.ref_name.clone(),
            head_sha: input.head_sha.clone().unwrap_or_default(),
            status,
            suites_found,
            tests_found,
            error_message,
        },
    )
    .await
    .map_err(AppError::from)
}

/// Walks the repository tree at the requested ref, reconciles discovered
/// `.rocketship` suites into the catalog, and records one scan attempt.
/// Per-file parse failures are collected, never fatal.
pub async fn scan(pool: &PgPool, host: &dyn RepoHost, input: &ScanInput) -> AppResult<ScanAttempt> {
    let Some((owner, repo)) = split_full_name(&input.repo_full_name) else {
        return record_attempt(
            pool,
            input,
            ScanStatus::Error,
            0,
            0,
            format!("invalid repository name {:?}", input.repo_full_name),
        )
        .await;
    };

    let repository = match host.get_repository(input.installation_id, owner, repo).await {
        Ok(repository) => repository,
        Err(e) => {
            return record_attempt(pool, input, ScanStatus::Error, 0, 0, e.to_string()).await;
        }
    };
    let fetch_ref = input
        .head_sha
        .as_deref()
        .filter(|sha| !sha.is_empty())
        .unwrap_or(&input.source_ref.ref_name);
    let tree = match host
        .get_tree(input.installation_id, owner, repo, fetch_ref)
        .await
    {
        Ok(tree) => tree,
        Err(e) => {
            return record_attempt(pool, input, ScanStatus::Error, 0, 0, e.to_string()).await;
        }
    };

    let dirs = collect_rocketship_dirs(&tree);
    if dirs.is_empty() {
        return record_attempt(
            pool,
            input,
            ScanStatus::Skipped,
            0,
            0,
            "no .rocketship directories found".into(),
        )
        .await;
    }

    let mut suites_found = 0i32;
    let mut tests_found = 0i32;
    let mut errors: Vec<String> = Vec::new();

    for dir in &dirs {
        let project =
            match find_or_create_project(pool, input, repo, &repository.default_branch, dir).await {
                Ok(project) => project,
                Err(e) => {
                    errors.push(format!("{dir}: {e}"));
                    continue;
                }
            };
        for file_path in yaml_files_in(&tree, dir) {
            let content = match host
                .get_file_content(input.installation_id, owner, repo, &file_path, fetch_ref)
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    errors.push(format!("{file_path}: {e}"));
                    continue;
                }
            };
            let suite_file = match dsl::parse_suite(&content) {
                Ok(suite_file) => suite_file,
                Err(e) => {
                    errors.push(format!("{file_path}: {e}"));
                    continue;
                }
            };
            let suite_name = if suite_file.name.trim().is_empty() {
                file_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&file_path)
                    .to_string()
            } else {
                suite_file.name.clone()
            };
            let suite = match suites::upsert_suite(
                pool,
                &UpsertSuite {
                    project_id: project.id,
                    name: &suite_name,
                    description: &suite_file.description,
                    file_path: &file_path,
                    source_ref: &input.source_ref.ref_name,
                    test_count: suite_file.tests.len() as i32,
                },
            )
            .await
            {
                Ok(suite) => suite,
                Err(e) => {
                    errors.push(format!("{file_path}: {e}"));
                    continue;
                }
            };
            suites_found += 1;
            for test in &suite_file.tests {
                match suites::upsert_test(
                    pool,
                    &UpsertTest {
                        suite_id: suite.id,
                        project_id: project.id,
                        name: &test.name,
                        source_ref: &input.source_ref.ref_name,
                        step_count: test.steps.len() as i32,
                    },
                )
                .await
                {
                    Ok(_) => tests_found += 1,
                    Err(e) => errors.push(format!("{file_path}: {}: {e}", test.name)),
                }
            }
        }
    }

    let (status, error_message) = if errors.is_empty() {
        (ScanStatus::Success, String::new())
    } else {
        (ScanStatus::Error, errors.join("; "))
    };
    tracing::info!(
        delivery_id = %input.delivery_id,
        repo = %input.repo_full_name,
        source_ref = %input.source_ref.ref_name,
        suites_found,
        tests_found,
        status = status.as_str(),
        "scan finished"
    );
    record_attempt(pool, input, status, suites_found, tests_found, error_message).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            kind: "tree".into(),
            sha: "t".into(),
            size: None,
        }
    }

    fn blob(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            kind: "blob".into(),
            sha: "b".into(),
            size: Some(10),
        }
    }

    #[test]
    fn full_names_require_exactly_one_slash() {
        assert_eq!(split_full_name("acme/shop"), Some(("acme", "shop")));
        assert_eq!(split_full_name("acme"), None);
        assert_eq!(split_full_name("acme/shop/extra"), None);
        assert_eq!(split_full_name("/shop"), None);
        assert_eq!(split_full_name("acme/"), None);
    }

    #[test]
    fn dirs_found_from_tree_entries() {
        let entries = vec![
            tree("src"),
            tree(".rocketship"),
            tree("sub/.rocketship"),
            blob("sub/.rocketship/a.yaml"),
        ];
        assert_eq!(
            collect_rocketship_dirs(&entries),
            vec![".rocketship", "sub/.rocketship"]
        );
    }

    #[test]
    fn dirs_recovered_from_blob_parents() {
        // No tree entry for the directory itself.
        let entries = vec![blob("deep/nested/.rocketship/suite.yml"), blob("README.md")];
        assert_eq!(
            collect_rocketship_dirs(&entries),
            vec!["deep/nested/.rocketship"]
        );
    }

    #[test]
    fn dirs_deduplicated() {
        let entries = vec![
            tree("sub/.rocketship"),
            blob("sub/.rocketship/a.yaml"),
            blob("sub/.rocketship/b.yaml"),
        ];
        assert_eq!(collect_rocketship_dirs(&entries), vec!["sub/.rocketship"]);
    }

    #[test]
    fn rocketship_like_names_ignored() {
        let entries = vec![tree("not.rocketship"), blob("xrocketship/a.yaml")];
        assert!(collect_rocketship_dirs(&entries).is_empty());
    }

    #[test]
    fn project_names_follow_directory_nesting() {
        assert_eq!(project_name_for("shop", ".rocketship"), "shop");
        assert_eq!(project_name_for("shop", "sub/.rocketship"), "shop-sub");
        assert_eq!(
            project_name_for("shop", "services/cart/.rocketship"),
            "shop-services-cart"
        );
    }

    #[test]
    fn yaml_files_only_direct_children() {
        let entries = vec![
            blob(".rocketship/a.yaml"),
            blob(".rocketship/b.yml"),
            blob(".rocketship/readme.md"),
            blob(".rocketship/nested/c.yaml"),
            tree(".rocketship/nested"),
            blob("other/.rocketship/d.yaml"),
        ];
        assert_eq!(
            yaml_files_in(&entries, ".rocketship"),
            vec![".rocketship/a.yaml", ".rocketship/b.yml"]
        );
    }
}
