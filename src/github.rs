use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config;
use crate::error::{AppError, AppResult};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "rocketship-core";
const ERROR_BODY_LIMIT: usize = 300;

fn default_expires_in() -> u64 {
    900
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

#[derive(Debug, Clone)]
pub struct UpstreamToken {
    pub access_token: String,
    pub scope: String,
}

/// Upstream token-endpoint error, forwarded verbatim to polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    pub default_branch: String,
}

/// One entry of a recursive git tree. `kind` is `tree` or `blob`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct AppJwtClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

/// Installation-scoped repository reads, separated from the concrete client
/// so the scanner can be driven by an in-memory tree in tests.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn get_repository(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
    ) -> AppResult<RepositoryInfo>;

    async fn get_tree(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> AppResult<Vec<TreeEntry>>;

    async fn get_file_content(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> AppResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub device_url: String,
    pub token_url: String,
    pub user_url: String,
    pub emails_url: String,
    pub api_url: String,
    pub app_id: Option<u64>,
    pub app_private_key_pem: Option<String>,
}

/// Thin client over GitHub's device, OAuth, App, and REST APIs. No business
/// logic; non-2xx answers become `Upstream` errors with a truncated body.
pub struct GithubClient {
    cfg: GithubClientConfig,
    client: Client,
}

impl GithubClient {
    pub fn new(cfg: GithubClientConfig) -> Self {
        Self {
            cfg,
            client: Client::builder()
                .timeout(UPSTREAM_TIMEOUT)
                .build()
                .expect("client build"),
        }
    }

    pub fn from_env() -> AppResult<Self> {
        let app_private_key_pem = match config::GITHUB_APP_PRIVATE_KEY_FILE.as_deref() {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                AppError::Message(format!("cannot read GitHub App key {path}: {e}"))
            })?),
            None => None,
        };
        Ok(Self::new(GithubClientConfig {
            client_id: config::GITHUB_CLIENT_ID.clone(),
            client_secret: config::GITHUB_CLIENT_SECRET.clone(),
            device_url: config::GITHUB_DEVICE_URL.clone(),
            token_url: config::GITHUB_TOKEN_URL.clone(),
            user_url: config::GITHUB_USER_URL.clone(),
            emails_url: config::GITHUB_EMAILS_URL.clone(),
            api_url: config::GITHUB_API_URL.trim_end_matches('/').to_string(),
            app_id: *config::GITHUB_APP_ID,
            app_private_key_pem,
        }))
    }

    async fn check(resp: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        Err(AppError::Upstream(format!("github {status}: {truncated}")))
    }

    pub async fn request_device_code(&self, scopes: &str) -> AppResult<DeviceCodeResponse> {
        let resp = self
            .client
            .post(&self.cfg.device_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&[("client_id", self.cfg.client_id.as_str()), ("scope", scopes)])
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    fn token_from_payload(payload: TokenPayload) -> Result<UpstreamToken, TokenError> {
        if let Some(error) = payload.error {
            return Err(TokenError {
                error,
                error_description: payload.error_description,
            });
        }
        match payload.access_token {
            Some(token) if !token.is_empty() => Ok(UpstreamToken {
                access_token: token,
                scope: payload.scope.unwrap_or_default(),
            }),
            // GitHub answers 200 with an empty body while the user has not
            // finished the verification step.
            _ => Err(TokenError {
                error: "authorization_pending".into(),
                error_description: None,
            }),
        }
    }

    pub async fn exchange_device_code(
        &self,
        device_code: &str,
    ) -> AppResult<Result<UpstreamToken, TokenError>> {
        let resp = self
            .client
            .post(&self.cfg.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&[
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await?;
        let payload: TokenPayload = Self::check(resp).await?.json().await?;
        Ok(Self::token_from_payload(payload))
    }

    /// The PKCE verifier rides alongside the client secret; the provider
    /// accepts both.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> AppResult<Result<UpstreamToken, TokenError>> {
        let resp = self
            .client
            .post(&self.cfg.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&[
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await?;
        let payload: TokenPayload = Self::check(resp).await?.json().await?;
        Ok(Self::token_from_payload(payload))
    }

    pub async fn fetch_user(&self, access_token: &str) -> AppResult<GithubUser> {
        let resp = self
            .client
            .get(&self.cfg.user_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .bearer_auth(access_token)
            .send()
            .await?;
        let mut user: GithubUser = Self::check(resp).await?.json().await?;
        if user.email.as_deref().unwrap_or("").is_empty() {
            user.email = self.fetch_primary_email(access_token).await?;
        }
        Ok(user)
    }

    /// First verified primary, else first verified, else the first address.
    async fn fetch_primary_email(&self, access_token: &str) -> AppResult<Option<String>> {
        let resp = self
            .client
            .get(&self.cfg.emails_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .bearer_auth(access_token)
            .send()
            .await?;
        let emails: Vec<GithubEmail> = Self::check(resp).await?.json().await?;
        let chosen = emails
            .iter()
            .find(|e| e.primary && e.verified)
            .or_else(|| emails.iter().find(|e| e.verified))
            .or_else(|| emails.first());
        Ok(chosen.map(|e| e.email.clone()))
    }

    fn app_jwt(&self) -> AppResult<String> {
        let app_id = self
            .cfg
            .app_id
            .ok_or_else(|| AppError::Message("GITHUB_APP_ID is not configured".into()))?;
        let pem = self
            .cfg
            .app_private_key_pem
            .as_deref()
            .ok_or_else(|| AppError::Message("GitHub App private key is not configured".into()))?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| AppError::Message(format!("system time error: {e}")))?
            .as_secs();
        let claims = AppJwtClaims {
            iat: now.saturating_sub(60),
            exp: now + 9 * 60,
            iss: app_id.to_string(),
        };
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AppError::Message(format!("invalid GitHub App key: {e}")))?;
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &key,
        )
        .map_err(|e| AppError::Message(format!("app JWT encoding failed: {e}")))
    }

    async fn installation_token(&self, installation_id: i64) -> AppResult<String> {
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.cfg.api_url
        );
        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .bearer_auth(jwt)
            .send()
            .await?;
        let payload: InstallationTokenResponse = Self::check(resp).await?.json().await?;
        Ok(payload.token)
    }

    async fn installation_get(&self, installation_id: i64, url: &str) -> AppResult<reqwest::Response> {
        let token = self.installation_token(installation_id).await?;
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .bearer_auth(token)
            .send()
            .await?;
        Self::check(resp).await
    }
}

#[async_trait]
impl RepoHost for GithubClient {
    async fn get_repository(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
    ) -> AppResult<RepositoryInfo> {
        let url = format!("{}/repos/{owner}/{repo}", self.cfg.api_url);
        Ok(self
            .installation_get(installation_id, &url)
            .await?
            .json()
            .await?)
    }

    async fn get_tree(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> AppResult<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{owner}/{repo}/git/trees/{git_ref}?recursive=true",
            self.cfg.api_url
        );
        let payload: TreeResponse = self
            .installation_get(installation_id, &url)
            .await?
            .json()
            .await?;
        Ok(payload.tree)
    }

    async fn get_file_content(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> AppResult<Vec<u8>> {
        let url = format!(
            "{}/repos/{owner}/{repo}/contents/{path}?ref={git_ref}",
            self.cfg.api_url
        );
        let payload: ContentsResponse = self
            .installation_get(installation_id, &url)
            .await?
            .json()
            .await?;
        if payload.encoding != "base64" {
            return Err(AppError::Upstream(format!(
                "unexpected contents encoding {}",
                payload.encoding
            )));
        }
        let compact: String = payload
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        STANDARD
            .decode(compact)
            .map_err(|e| AppError::Upstream(format!("invalid base64 file content: {e}")))
    }
}
