pub mod ci_tokens;
pub mod invites;
pub mod orgs;
pub mod projects;
pub mod refresh_tokens;
pub mod registrations;
pub mod scans;
pub mod suites;
pub mod users;

use crate::error::AppError;

/// Classified store errors. Handlers translate these into HTTP kinds at the
/// boundary; inner layers stay free of status codes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("refresh token not found")]
    RefreshTokenNotFound,
    #[error("email already in use")]
    EmailInUse,
    #[error("organization slug already in use")]
    OrganizationSlugUsed,
    #[error("already exists")]
    AlreadyExists,
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound | StoreError::RefreshTokenNotFound => AppError::NotFound,
            StoreError::EmailInUse => AppError::Conflict("email already in use".into()),
            StoreError::OrganizationSlugUsed => {
                AppError::Conflict("organization slug already in use".into())
            }
            StoreError::AlreadyExists => AppError::Conflict("already exists".into()),
            StoreError::Crypto(msg) => AppError::Message(msg),
            StoreError::Db(e) => AppError::Db(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// True when the error is a Postgres unique violation, optionally on a
/// specific constraint.
pub fn is_unique_violation(e: &sqlx::Error, constraint: Option<&str>) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        if db_err.code().as_deref() != Some("23505") {
            return false;
        }
        match constraint {
            Some(name) => db_err.constraint() == Some(name),
            None => true,
        }
    } else {
        false
    }
}
