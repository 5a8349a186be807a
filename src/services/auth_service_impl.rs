//! `SeaORM` implementation of the `AuthService` trait.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::task;
use tracing::{info, warn};

use crate::clients::Mailer;
use crate::config::SecurityConfig;
use crate::db::repositories::user::{Role, User};
use crate::db::{SecurityQuestion, Store};
use crate::services::auth_service::{
    AuthError, AuthService, CreateUserRequest, LoginOutcome, SecurityAnswerInput, SessionInfo,
    UpdateUserRequest,
};
use crate::services::otp::OtpService;
use crate::services::password;
use crate::services::token::TokenService;

/// Setup tokens live for 24 hours.
const SETUP_TOKEN_TTL_HOURS: i64 = 24;

pub struct SeaOrmAuthService {
    store: Store,
    tokens: Arc<TokenService>,
    otp: Arc<OtpService>,
    mailer: Arc<dyn Mailer>,
    security: SecurityConfig,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        tokens: Arc<TokenService>,
        otp: Arc<OtpService>,
        mailer: Arc<dyn Mailer>,
        security: SecurityConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            otp,
            mailer,
            security,
        }
    }

    /// Random 64-char hex string for setup tokens.
    fn generate_setup_token() -> String {
        let mut rng = rand::rng();
        let bytes: [u8; 32] = rng.random();

        bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }

    async fn hash_password_blocking(&self, plaintext: &str) -> Result<String, AuthError> {
        let plaintext = plaintext.to_string();
        let config = self.security.clone();

        task::spawn_blocking(move || password::hash_password(&plaintext, Some(&config)))
            .await
            .map_err(|e| AuthError::Internal(format!("Password hashing task panicked: {e}")))?
            .map_err(Into::into)
    }

    /// Adaptive verification first; legacy fallback only when the stored
    /// value has the legacy shape. Returns whether the password matched and
    /// whether the hash needs the migration re-write.
    async fn verify_password_blocking(
        &self,
        plaintext: &str,
        stored_hash: &str,
    ) -> Result<(bool, bool), AuthError> {
        let plaintext = plaintext.to_string();
        let stored = stored_hash.to_string();

        task::spawn_blocking(move || {
            if password::verify_password(&plaintext, &stored).unwrap_or(false) {
                return (true, false);
            }
            if password::is_legacy_hash(&stored) && password::verify_legacy(&plaintext, &stored) {
                return (true, true);
            }
            (false, false)
        })
        .await
        .map_err(|e| AuthError::Internal(format!("Password verification task panicked: {e}")))
    }

    async fn open_session(&self, user: &User) -> Result<SessionInfo, AuthError> {
        self.store.touch_last_login(user.id).await?;
        let token = self.tokens.issue(user)?;

        Ok(SessionInfo {
            token,
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
        })
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        // Absent user and wrong password must be indistinguishable.
        let Some((user, stored_hash)) = self
            .store
            .get_user_by_username_with_password(username)
            .await?
        else {
            return Err(AuthError::InvalidCredentials);
        };

        if !user.active {
            return Err(AuthError::AccountDisabled);
        }

        let (matched, needs_migration) =
            self.verify_password_blocking(password, &stored_hash).await?;

        if !matched {
            return Err(AuthError::InvalidCredentials);
        }

        if needs_migration {
            let upgraded = self.hash_password_blocking(password).await?;
            self.store
                .update_user_password_hash(user.id, &upgraded)
                .await?;
            info!("Migrated legacy password hash for user {}", user.id);
        }

        if self.otp.enabled() {
            self.otp.issue(&user).await?;
            return Ok(LoginOutcome::OtpRequired);
        }

        Ok(LoginOutcome::Session(self.open_session(&user).await?))
    }

    async fn verify_otp(&self, username: &str, code: &str) -> Result<SessionInfo, AuthError> {
        let Some(user) = self.store.get_user_by_username(username).await? else {
            return Err(AuthError::InvalidCredentials);
        };

        if !user.active {
            return Err(AuthError::AccountDisabled);
        }

        self.otp.verify(&user, code).await?;

        self.open_session(&user).await
    }

    async fn create_user(&self, request: CreateUserRequest) -> Result<User, AuthError> {
        let username = request.username.trim();
        let email = request.email.trim();

        if username.is_empty() {
            return Err(AuthError::Validation("Username is required".to_string()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation(
                "A valid email address is required".to_string(),
            ));
        }

        if self.store.username_exists(username).await? {
            return Err(AuthError::Conflict("Username is already taken".to_string()));
        }
        if self.store.email_exists(email).await? {
            return Err(AuthError::Conflict(
                "Email address is already in use".to_string(),
            ));
        }

        let user = self.store.create_user(username, email, request.role).await?;

        let token = Self::generate_setup_token();
        let expires_at =
            (chrono::Utc::now() + chrono::Duration::hours(SETUP_TOKEN_TTL_HOURS)).to_rfc3339();
        self.store
            .replace_setup_token(user.id, &token, &expires_at)
            .await?;

        // An account nobody can set a password for is useless, so a failed
        // setup mail rolls the whole creation back.
        if let Err(e) = self
            .mailer
            .send_password_setup_email(&user.email, &user.username, &token)
            .await
        {
            warn!("Setup mail failed for new user {}, rolling back", user.id);
            self.store.delete_user_cascade(user.id).await?;
            return Err(e.into());
        }

        info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    async fn update_user(&self, id: i32, request: UpdateUserRequest) -> Result<(), AuthError> {
        let Some(target) = self.store.get_user_by_id(id).await? else {
            return Err(AuthError::NotFound);
        };

        let username = request.username.trim();
        let email = request.email.trim();

        if username.is_empty() {
            return Err(AuthError::Validation("Username is required".to_string()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation(
                "A valid email address is required".to_string(),
            ));
        }

        if target.is_super_admin && request.role != Role::Admin {
            return Err(AuthError::Forbidden(
                "Cannot change the role of the super admin".to_string(),
            ));
        }

        if !username.eq_ignore_ascii_case(&target.username)
            && self.store.username_exists(username).await?
        {
            return Err(AuthError::Conflict("Username is already taken".to_string()));
        }
        if !email.eq_ignore_ascii_case(&target.email) && self.store.email_exists(email).await? {
            return Err(AuthError::Conflict(
                "Email address is already in use".to_string(),
            ));
        }

        self.store
            .update_user_profile(id, username, email, request.role)
            .await?;

        Ok(())
    }

    async fn delete_user(&self, target_id: i32, acting_username: &str) -> Result<(), AuthError> {
        let Some(actor) = self.store.get_user_by_username(acting_username).await? else {
            return Err(AuthError::NotFound);
        };
        let Some(target) = self.store.get_user_by_id(target_id).await? else {
            return Err(AuthError::NotFound);
        };

        if target.is_super_admin {
            return Err(AuthError::Forbidden(
                "Cannot delete the default admin".to_string(),
            ));
        }
        if actor.id == target.id {
            return Err(AuthError::Forbidden(
                "Cannot delete your own account".to_string(),
            ));
        }
        if target.role == Role::Admin && !actor.is_super_admin {
            return Err(AuthError::Forbidden(
                "Only the default admin can delete other admins".to_string(),
            ));
        }

        self.store.delete_user_cascade(target_id).await?;
        info!(
            "User {} deleted by {}",
            target.username, actor.username
        );

        Ok(())
    }

    async fn update_user_status(&self, target_id: i32, active: bool) -> Result<(), AuthError> {
        let Some(target) = self.store.get_user_by_id(target_id).await? else {
            return Err(AuthError::NotFound);
        };

        // Reactivating the super admin is fine; switching it off is not.
        if target.is_super_admin && !active {
            return Err(AuthError::Forbidden(
                "Cannot deactivate the super admin".to_string(),
            ));
        }

        self.store.set_user_active(target_id, active).await?;
        Ok(())
    }

    async fn change_password(&self, target_id: i32, new_password: &str) -> Result<(), AuthError> {
        let Some(target) = self.store.get_user_by_id(target_id).await? else {
            return Err(AuthError::NotFound);
        };

        if new_password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }

        let hash = self.hash_password_blocking(new_password).await?;
        self.store
            .update_user_password_hash(target_id, &hash)
            .await?;

        // Heads-up mail only; the password change itself already succeeded.
        self.mailer
            .send_notification(
                &target.email,
                "Your password was changed",
                "An administrator set a new password for your account.",
            )
            .await;

        Ok(())
    }

    async fn validate_setup_token(&self, token: &str) -> Result<bool, AuthError> {
        let Some(record) = self.store.find_unused_setup_token(token).await? else {
            return Ok(false);
        };

        let live = chrono::DateTime::parse_from_rfc3339(&record.expires_at)
            .is_ok_and(|t| t > chrono::Utc::now());

        Ok(live)
    }

    async fn complete_password_setup(
        &self,
        token: &str,
        new_password: &str,
        answers: Vec<SecurityAnswerInput>,
    ) -> Result<(), AuthError> {
        if new_password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }
        if answers.len() < 2 {
            return Err(AuthError::Validation(
                "At least two security answers are required".to_string(),
            ));
        }

        let mut question_ids: Vec<i32> = answers.iter().map(|a| a.question_id).collect();
        question_ids.sort_unstable();
        question_ids.dedup();
        if question_ids.len() != answers.len() {
            return Err(AuthError::Validation(
                "Each security question may only be answered once".to_string(),
            ));
        }

        // Missing, expired, and already-used tokens all collapse to the same
        // outcome so the response leaks nothing about which it was.
        let Some(record) = self.store.find_unused_setup_token(token).await? else {
            return Err(AuthError::InvalidSetupToken);
        };
        let live = chrono::DateTime::parse_from_rfc3339(&record.expires_at)
            .is_ok_and(|t| t > chrono::Utc::now());
        if !live {
            return Err(AuthError::InvalidSetupToken);
        }

        // Every question id must check out before anything is written.
        let known = self
            .store
            .active_security_question_ids(&question_ids)
            .await?;
        if known.len() != question_ids.len() {
            return Err(AuthError::Validation(
                "Unknown security question".to_string(),
            ));
        }

        let mut answer_hashes = Vec::with_capacity(answers.len());
        for answer in &answers {
            let normalized = answer.answer.trim().to_lowercase();
            if normalized.is_empty() {
                return Err(AuthError::Validation(
                    "Security answers must not be empty".to_string(),
                ));
            }
            answer_hashes.push((answer.question_id, password::sha256_hex(&normalized)));
        }

        let password_hash = self.hash_password_blocking(new_password).await?;

        self.store
            .complete_password_setup(record.id, record.user_id, password_hash, answer_hashes)
            .await?;

        info!("Password setup completed for user {}", record.user_id);
        Ok(())
    }

    async fn get_active_security_questions(&self) -> Result<Vec<SecurityQuestion>, AuthError> {
        Ok(self.store.list_active_security_questions().await?)
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        Ok(self.store.list_users().await?)
    }
}
