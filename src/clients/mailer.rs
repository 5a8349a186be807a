//! Outbound email collaborator.
//!
//! OTP and password-setup mail carry the actual secret, so a delivery
//! failure there is a hard error for the calling flow. Anything informational
//! should be sent with `send_notification`, which only logs failures.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Email delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a one-time login code. Failure aborts the login flow.
    async fn send_otp_email(&self, to: &str, username: &str, code: &str)
    -> Result<(), MailerError>;

    /// Deliver a password-setup link token. Failure aborts user creation.
    async fn send_password_setup_email(
        &self,
        to: &str,
        username: &str,
        token: &str,
    ) -> Result<(), MailerError>;

    /// Best-effort notification mail. Never propagates failure.
    async fn send_notification(&self, to: &str, subject: &str, body: &str);
}

/// Development mailer: writes the message to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_otp_email(
        &self,
        to: &str,
        username: &str,
        code: &str,
    ) -> Result<(), MailerError> {
        info!("OTP mail to {to} (user {username}): code {code}");
        Ok(())
    }

    async fn send_password_setup_email(
        &self,
        to: &str,
        username: &str,
        token: &str,
    ) -> Result<(), MailerError> {
        info!("Password setup mail to {to} (user {username}): token {token}");
        Ok(())
    }

    async fn send_notification(&self, to: &str, subject: &str, _body: &str) {
        info!("Notification mail to {to}: {subject}");
    }
}

/// Production mailer: posts JSON to the configured delivery webhook
/// (the mail service renders the actual templates).
pub struct WebhookMailer {
    client: reqwest::Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: String, timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .user_agent("Almoner/1.0")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build mailer HTTP client: {e}"))?;

        Ok(Self { client, url })
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), MailerError> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailerError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MailerError::Delivery(format!(
                "Mail webhook returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send_otp_email(
        &self,
        to: &str,
        username: &str,
        code: &str,
    ) -> Result<(), MailerError> {
        self.post(json!({
            "template": "otp",
            "to": to,
            "username": username,
            "code": code,
        }))
        .await
    }

    async fn send_password_setup_email(
        &self,
        to: &str,
        username: &str,
        token: &str,
    ) -> Result<(), MailerError> {
        self.post(json!({
            "template": "password_setup",
            "to": to,
            "username": username,
            "token": token,
        }))
        .await
    }

    async fn send_notification(&self, to: &str, subject: &str, body: &str) {
        let result = self
            .post(json!({
                "template": "notification",
                "to": to,
                "subject": subject,
                "body": body,
            }))
            .await;

        if let Err(e) = result {
            warn!("Dropping notification mail to {to}: {e}");
        }
    }
}
