//! One-time code second factor.
//!
//! A challenge moves through issued → verified, expired, or exhausted.
//! Expiry is only checked when a code is presented; an expired challenge
//! behaves exactly like a missing one.

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clients::Mailer;
use crate::config::OtpConfig;
use crate::db::Store;
use crate::db::repositories::user::User;
use crate::services::auth_service::AuthError;
use crate::services::password::sha256_hex;

pub struct OtpService {
    store: Store,
    mailer: Arc<dyn Mailer>,
    config: OtpConfig,
    /// One lock per user id so the delete-then-create window during issuance
    /// can't race two near-simultaneous logins into two live challenges.
    issue_locks: DashMap<i32, Arc<Mutex<()>>>,
}

impl OtpService {
    #[must_use]
    pub fn new(store: Store, mailer: Arc<dyn Mailer>, config: OtpConfig) -> Self {
        Self {
            store,
            mailer,
            config,
            issue_locks: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn user_lock(&self, user_id: i32) -> Arc<Mutex<()>> {
        self.issue_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::rng();
        (0..self.config.code_length)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect()
    }

    /// Replace any pending challenge with a fresh code and mail it out.
    /// Mail failure is a hard error: login cannot proceed without the code.
    pub async fn issue(&self, user: &User) -> Result<(), AuthError> {
        let lock = self.user_lock(user.id);
        let result = {
            let _guard = lock.lock().await;
            self.replace_challenge(user).await
        };
        drop(lock);

        // Entries for users with no issuance in flight are dropped so the
        // lock map stays bounded by concurrent logins, not total users.
        self.issue_locks
            .remove_if(&user.id, |_, entry| Arc::strong_count(entry) == 1);

        result
    }

    async fn replace_challenge(&self, user: &User) -> Result<(), AuthError> {
        self.store.delete_unused_otps(user.id).await?;

        let code = self.generate_code();
        let code_hash = sha256_hex(&code);
        let expires_at = (chrono::Utc::now()
            + chrono::Duration::minutes(i64::from(self.config.ttl_minutes)))
        .to_rfc3339();

        self.store
            .create_otp(user.id, &code_hash, &expires_at)
            .await?;

        self.mailer
            .send_otp_email(&user.email, &user.username, &code)
            .await?;

        debug!("Issued OTP challenge for user {}", user.id);
        Ok(())
    }

    /// Check a presented code against the user's pending challenge.
    pub async fn verify(&self, user: &User, code: &str) -> Result<(), AuthError> {
        let Some(challenge) = self.store.latest_unused_otp(user.id).await? else {
            return Err(AuthError::OtpMissing);
        };

        let live = chrono::DateTime::parse_from_rfc3339(&challenge.expires_at)
            .is_ok_and(|t| t > chrono::Utc::now());
        if !live {
            return Err(AuthError::OtpMissing);
        }

        // The attempt is counted and persisted before the comparison so a
        // crashed request can't be replayed for a free guess.
        let attempts = self.store.increment_otp_attempts(challenge.id).await?;

        if sha256_hex(code) != challenge.code_hash {
            if attempts >= i32::try_from(self.config.max_attempts).unwrap_or(i32::MAX) {
                self.store.delete_otp(challenge.id).await?;
                return Err(AuthError::OtpAttemptsExceeded);
            }
            return Err(AuthError::OtpInvalid);
        }

        self.store.mark_otp_used(challenge.id).await?;
        Ok(())
    }
}
