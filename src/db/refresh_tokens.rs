use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::db::users::User;
use crate::secrets;

/// Body of a stored refresh token. Persisted only as an AES-GCM envelope;
/// nothing outside this module sees the ciphertext, nothing outside the
/// broker sees the plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshRecord {
    pub token_id: Uuid,
    pub user: User,
    pub organization_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// SQL-backed refresh-token store. Rows are keyed by the opaque token string
/// and carry `nonce || ciphertext` record bodies under a process-held key.
#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: PgPool,
    key: [u8; secrets::KEY_SIZE],
}

impl RefreshTokenStore {
    pub fn new(pool: PgPool, key: [u8; secrets::KEY_SIZE]) -> Self {
        Self { pool, key }
    }

    fn seal_record(&self, record: &RefreshRecord) -> StoreResult<Vec<u8>> {
        let plain = serde_json::to_vec(record)
            .map_err(|e| StoreError::Crypto(format!("record serialization failed: {e}")))?;
        secrets::seal(&self.key, &plain).map_err(|e| StoreError::Crypto(e.to_string()))
    }

    fn open_record(&self, envelope: &[u8]) -> StoreResult<RefreshRecord> {
        let plain = secrets::open(&self.key, envelope)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;
        serde_json::from_slice(&plain)
            .map_err(|e| StoreError::Crypto(format!("record deserialization failed: {e}")))
    }

    pub async fn save(&self, token: &str, record: &RefreshRecord) -> StoreResult<()> {
        let envelope = self.seal_record(record)?;
        sqlx::query("INSERT INTO refresh_tokens (token, record) VALUES ($1, $2)")
            .bind(token)
            .bind(envelope)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, token: &str) -> StoreResult<RefreshRecord> {
        let envelope: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT record FROM refresh_tokens WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        let Some(envelope) = envelope else {
            return Err(StoreError::RefreshTokenNotFound);
        };
        self.open_record(&envelope)
    }

    pub async fn delete(&self, token: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RefreshTokenNotFound);
        }
        Ok(())
    }

    /// Atomic rotation: the old row is deleted and the new one inserted in a
    /// single transaction. Concurrent rotations of the same token race on the
    /// delete; exactly one sees an affected row, the loser gets
    /// `RefreshTokenNotFound`.
    pub async fn rotate(
        &self,
        old_token: &str,
        new_token: &str,
        record: &RefreshRecord,
    ) -> StoreResult<()> {
        let envelope = self.seal_record(record)?;
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(old_token)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::RefreshTokenNotFound);
        }
        sqlx::query("INSERT INTO refresh_tokens (token, record) VALUES ($1, $2)")
            .bind(new_token)
            .bind(envelope)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
