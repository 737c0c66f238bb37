use axum::extract::Path;
use axum::{Extension, Json};
use chrono::Utc;
use rocketship_core::error::AppError;
use rocketship_core::extractor::Principal;
use rocketship_core::members::{list_members, remove_member, set_member_role, SetMemberRoleRequest};
use rocketship_core::token::AccessClaims;
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_user(pool: &PgPool, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, github_user_id, email, name, username) \
         VALUES ($1, $2, $3, $4, $4)",
    )
    .bind(id)
    .bind(i64::from(id.as_fields().0))
    .bind(format!("{username}-{id}@example.com"))
    .bind(username)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn seed_org_with_admin(pool: &PgPool, admin: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO organizations (id, name, slug) VALUES ($1, 'Org', $2)")
        .bind(id)
        .bind(format!("org-{id}"))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, is_admin) \
         VALUES ($1, $2, TRUE)",
    )
    .bind(id)
    .bind(admin)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn seed_project(pool: &PgPool, org: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO projects (id, organization_id, name, source_ref) \
         VALUES ($1, $2, $3, 'main')",
    )
    .bind(id)
    .bind(org)
    .bind(format!("project-{id}"))
    .execute(pool)
    .await
    .unwrap();
    id
}

fn owner_principal(user_id: Uuid) -> Principal {
    let now = Utc::now();
    Principal {
        claims: AccessClaims {
            iss: "https://auth.test".into(),
            aud: "rocketship".into(),
            sub: format!("user:{user_id}"),
            user_id,
            github_user_id: 7,
            exp: (now + chrono::Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
            email: "owner@example.com".into(),
            email_verified: true,
            name: "Owner".into(),
            preferred_username: "owner".into(),
            scope: "openid".into(),
            roles: vec!["owner".into()],
            jti: Uuid::new_v4().to_string(),
            org_id: None,
        },
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn admin_manages_member_roles(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let admin = seed_user(&pool, "admin").await;
    let member = seed_user(&pool, "member").await;
    let org = seed_org_with_admin(&pool, admin).await;
    let project = seed_project(&pool, org).await;

    set_member_role(
        Extension(pool.clone()),
        owner_principal(admin),
        Path((project, member)),
        Json(SetMemberRoleRequest { role: "read".into() }),
    )
    .await
    .expect("role set");

    let Json(members) = list_members(
        Extension(pool.clone()),
        owner_principal(admin),
        Path(project),
    )
    .await
    .expect("list members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, member);
    assert_eq!(members[0].role, "read");

    // Upsert to write.
    set_member_role(
        Extension(pool.clone()),
        owner_principal(admin),
        Path((project, member)),
        Json(SetMemberRoleRequest { role: "write".into() }),
    )
    .await
    .expect("role update");
    let Json(members) = list_members(
        Extension(pool.clone()),
        owner_principal(admin),
        Path(project),
    )
    .await
    .unwrap();
    assert_eq!(members[0].role, "write");

    remove_member(
        Extension(pool.clone()),
        owner_principal(admin),
        Path((project, member)),
    )
    .await
    .expect("member removed");
    let Json(members) = list_members(
        Extension(pool.clone()),
        owner_principal(admin),
        Path(project),
    )
    .await
    .unwrap();
    assert!(members.is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cross_org_access_is_forbidden(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let admin_one = seed_user(&pool, "admin-one").await;
    let admin_two = seed_user(&pool, "admin-two").await;
    let _org_one = seed_org_with_admin(&pool, admin_one).await;
    let org_two = seed_org_with_admin(&pool, admin_two).await;
    let project_in_two = seed_project(&pool, org_two).await;

    // Owner of org one probes a project owned by org two.
    let err = list_members(
        Extension(pool.clone()),
        owner_principal(admin_one),
        Path(project_in_two),
    )
    .await
    .unwrap_err();
    match err {
        AppError::Forbidden(msg) => {
            assert_eq!(msg, "owner role required for target organization")
        }
        other => panic!("expected forbidden, got {other:?}"),
    }

    let err = set_member_role(
        Extension(pool.clone()),
        owner_principal(admin_one),
        Path((project_in_two, admin_one)),
        Json(SetMemberRoleRequest { role: "write".into() }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = remove_member(
        Extension(pool.clone()),
        owner_principal(admin_one),
        Path((project_in_two, admin_two)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unknown_project_is_not_found(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let admin = seed_user(&pool, "admin").await;
    let _org = seed_org_with_admin(&pool, admin).await;

    let err = list_members(
        Extension(pool.clone()),
        owner_principal(admin),
        Path(Uuid::new_v4()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}
