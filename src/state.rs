use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clients::{LogMailer, Mailer, WebhookMailer};
use crate::config::Config;
use crate::db::Store;
use crate::rate_limit::RateLimiter;
use crate::services::{AuthService, OtpService, SeaOrmAuthService, TokenService};

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub auth_service: Arc<dyn AuthService>,

    pub token_service: Arc<TokenService>,

    pub rate_limiter: Arc<RateLimiter>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let mailer = build_mailer(&config)?;
        Self::with_mailer(config, mailer).await
    }

    /// Variant used by tests to capture outbound mail.
    pub async fn with_mailer(config: Config, mailer: Arc<dyn Mailer>) -> anyhow::Result<Self> {
        let store = Store::new(&config.database.url).await?;

        let token_service = Arc::new(TokenService::new(
            &config.security.session_secret,
            config.security.session_ttl_minutes,
        )?);

        let otp_service = Arc::new(OtpService::new(
            store.clone(),
            mailer.clone(),
            config.otp.clone(),
        ));

        let auth_service: Arc<dyn AuthService> = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            token_service.clone(),
            otp_service,
            mailer,
            config.security.clone(),
        ));

        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            auth_service,
            token_service,
            rate_limiter,
        })
    }
}

fn build_mailer(config: &Config) -> anyhow::Result<Arc<dyn Mailer>> {
    match config.email.mode.as_str() {
        "webhook" => Ok(Arc::new(WebhookMailer::new(
            config.email.webhook_url.clone(),
            config.email.timeout_seconds,
        )?)),
        _ => Ok(Arc::new(LogMailer)),
    }
}
