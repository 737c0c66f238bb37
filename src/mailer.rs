use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Outbound transactional mail. Body formatting and delivery live behind
/// this seam; the broker only cares that a code reached an address.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_registration_code(&self, email: &str, org_name: &str, code: &str)
        -> AppResult<()>;

    async fn send_invite_code(&self, email: &str, org_name: &str, code: &str) -> AppResult<()>;
}

/// Postmark-backed mailer.
pub struct PostmarkMailer {
    base: String,
    token: String,
    from: String,
    client: Client,
}

impl PostmarkMailer {
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("POSTMARK_TOKEN").ok()?;
        let from = std::env::var("POSTMARK_FROM").ok()?;
        let base = std::env::var("POSTMARK_API_URL")
            .unwrap_or_else(|_| "https://api.postmarkapp.com".into());
        Some(Self::new(base, token, from))
    }

    pub fn new(base: impl Into<String>, token: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            from: from.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("client build"),
        }
    }

    async fn deliver(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let url = format!("{}/email", self.base);
        let resp = self
            .client
            .post(&url)
            .header("X-Postmark-Server-Token", &self.token)
            .json(&serde_json::json!({
                "From": self.from,
                "To": to,
                "Subject": subject,
                "TextBody": body,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AppError::Upstream(format!("mail delivery failed: {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for PostmarkMailer {
    async fn send_registration_code(
        &self,
        email: &str,
        org_name: &str,
        code: &str,
    ) -> AppResult<()> {
        self.deliver(
            email,
            &format!("Verify your email for {org_name}"),
            &format!("Your Rocketship verification code is {code}. It expires in one hour."),
        )
        .await
    }

    async fn send_invite_code(&self, email: &str, org_name: &str, code: &str) -> AppResult<()> {
        self.deliver(
            email,
            &format!("You have been invited to {org_name}"),
            &format!("Your Rocketship invite code is {code}. It expires in one hour."),
        )
        .await
    }
}

/// Fallback used when no mail provider is configured. Logs instead of
/// sending so local development flows stay usable.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_registration_code(
        &self,
        email: &str,
        org_name: &str,
        _code: &str,
    ) -> AppResult<()> {
        tracing::warn!(%email, %org_name, "mailer not configured; registration code not sent");
        Ok(())
    }

    async fn send_invite_code(&self, email: &str, org_name: &str, _code: &str) -> AppResult<()> {
        tracing::warn!(%email, %org_name, "mailer not configured; invite code not sent");
        Ok(())
    }
}
