use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// OAuth-style error payload. These always render as HTTP 400 with
/// `{error, error_description?}` regardless of the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OauthError {
    pub error: String,
    pub error_description: Option<String>,
}

impl OauthError {
    pub fn new(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: Some(description.into()),
        }
    }

    pub fn bare(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: None,
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description)
    }

    pub fn unauthorized_client() -> Self {
        Self::bare("unauthorized_client")
    }

    pub fn unsupported_grant_type() -> Self {
        Self::bare("unsupported_grant_type")
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description)
    }

    pub fn authorization_pending() -> Self {
        Self::bare("authorization_pending")
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new("access_denied", description)
    }
}

impl std::fmt::Display for OauthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Oauth(OauthError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Gone(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("{0}")]
    Message(String),
}

impl From<OauthError> for AppError {
    fn from(e: OauthError) -> Self {
        AppError::Oauth(e)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors may embed URLs with query secrets; keep the summary.
        AppError::Upstream(e.without_url().to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Oauth(oauth) => {
                tracing::warn!(error = %oauth, "oauth error response");
                let mut body = json!({ "error": oauth.error });
                if let Some(desc) = oauth.error_description {
                    body["error_description"] = json!(desc);
                }
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            other => {
                let status = match &other {
                    AppError::NotFound => StatusCode::NOT_FOUND,
                    AppError::Unauthorized => StatusCode::UNAUTHORIZED,
                    AppError::Forbidden(_) => StatusCode::FORBIDDEN,
                    AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
                    AppError::Conflict(_) => StatusCode::CONFLICT,
                    AppError::Gone(_) => StatusCode::GONE,
                    AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
                    AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
                    AppError::Db(_) | AppError::Message(_) | AppError::Oauth(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    tracing::error!(error = ?other);
                }
                (status, Json(json!({ "error": other.to_string() }))).into_response()
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
