use chrono::{Duration, Utc};
use rocketship_core::db::refresh_tokens::{RefreshRecord, RefreshTokenStore};
use rocketship_core::db::users::User;
use rocketship_core::db::StoreError;
use rocketship_core::secrets;
use sqlx::PgPool;
use uuid::Uuid;

fn store(pool: &PgPool) -> RefreshTokenStore {
    RefreshTokenStore::new(pool.clone(), [7u8; 32])
}

async fn seed_user(pool: &PgPool) -> User {
    let id = Uuid::new_v4();
    let github_user_id = i64::from(id.as_fields().0);
    let row: (chrono::DateTime<Utc>, chrono::DateTime<Utc>) = sqlx::query_as(
        "INSERT INTO users (id, github_user_id, email, name, username) \
         VALUES ($1, $2, $3, $4, $5) RETURNING created_at, updated_at",
    )
    .bind(id)
    .bind(github_user_id)
    .bind(format!("{id}@example.com"))
    .bind("Dev")
    .bind("dev")
    .fetch_one(pool)
    .await
    .unwrap();
    User {
        id,
        github_user_id,
        email: format!("{id}@example.com"),
        name: "Dev".into(),
        username: "dev".into(),
        created_at: row.0,
        updated_at: row.1,
    }
}

fn record_for(user: User) -> RefreshRecord {
    let now = Utc::now();
    RefreshRecord {
        token_id: Uuid::new_v4(),
        user,
        organization_id: None,
        scopes: vec!["openid".into(), "profile".into()],
        issued_at: now,
        expires_at: now + Duration::days(30),
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn save_then_load_returns_same_record(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = store(&pool);
    let user = seed_user(&pool).await;
    let record = record_for(user);
    let token = secrets::generate_opaque_token();

    store.save(&token, &record).await.unwrap();
    let loaded = store.get(&token).await.unwrap();
    assert_eq!(loaded, record);

    // The persisted body is an opaque envelope, not the serialized record.
    let raw: Vec<u8> = sqlx::query_scalar("SELECT record FROM refresh_tokens WHERE token = $1")
        .bind(&token)
        .fetch_one(&pool)
        .await
        .unwrap();
    let plain = serde_json::to_vec(&record).unwrap();
    assert_ne!(raw, plain);
    assert!(!String::from_utf8_lossy(&raw).contains("example.com"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn load_after_delete_is_not_found(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = store(&pool);
    let record = record_for(seed_user(&pool).await);
    let token = secrets::generate_opaque_token();

    store.save(&token, &record).await.unwrap();
    store.delete(&token).await.unwrap();
    assert!(matches!(
        store.get(&token).await,
        Err(StoreError::RefreshTokenNotFound)
    ));
    assert!(matches!(
        store.delete(&token).await,
        Err(StoreError::RefreshTokenNotFound)
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn rotation_succeeds_at_most_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = store(&pool);
    let record = record_for(seed_user(&pool).await);
    let old_token = secrets::generate_opaque_token();
    store.save(&old_token, &record).await.unwrap();

    let new_token = secrets::generate_opaque_token();
    store.rotate(&old_token, &new_token, &record).await.unwrap();

    // The old token is gone; the new one is live.
    assert!(matches!(
        store.get(&old_token).await,
        Err(StoreError::RefreshTokenNotFound)
    ));
    assert_eq!(store.get(&new_token).await.unwrap(), record);

    // A second rotation from the stale token loses.
    let another = secrets::generate_opaque_token();
    assert!(matches!(
        store.rotate(&old_token, &another, &record).await,
        Err(StoreError::RefreshTokenNotFound)
    ));
    assert!(matches!(
        store.get(&another).await,
        Err(StoreError::RefreshTokenNotFound)
    ));

    // The new token rotates exactly once.
    let third = secrets::generate_opaque_token();
    store.rotate(&new_token, &third, &record).await.unwrap();
    assert!(matches!(
        store.rotate(&new_token, &secrets::generate_opaque_token(), &record).await,
        Err(StoreError::RefreshTokenNotFound)
    ));
    assert_eq!(store.get(&third).await.unwrap(), record);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn wrong_key_cannot_read_records(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let writer = RefreshTokenStore::new(pool.clone(), [1u8; 32]);
    let reader = RefreshTokenStore::new(pool.clone(), [2u8; 32]);
    let record = record_for(seed_user(&pool).await);
    let token = secrets::generate_opaque_token();

    writer.save(&token, &record).await.unwrap();
    assert!(matches!(
        reader.get(&token).await,
        Err(StoreError::Crypto(_))
    ));
}
