//! Domain service for authentication and account administration.
//!
//! Covers credential login, the optional OTP second factor, password-setup
//! onboarding, and the business rules protecting the super admin account.

use serde::Serialize;
use thiserror::Error;

use crate::db::repositories::user::{Role, User};
use crate::db::SecurityQuestion;

/// Errors specific to authentication and account administration.
///
/// The authentication family (credentials, OTP, setup tokens) keeps its
/// messages generic so responses never reveal whether an account exists.
/// The authorization family names the violated rule, since the actor is
/// already authenticated by then.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Invalid verification code")]
    OtpInvalid,

    #[error("No valid verification code, please log in again")]
    OtpMissing,

    #[error("Too many invalid attempts, please log in again")]
    OtpAttemptsExceeded,

    #[error("Invalid or expired token")]
    InvalidSetupToken,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("User not found")]
    NotFound,

    #[error("Email delivery failed: {0}")]
    Email(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<crate::clients::MailerError> for AuthError {
    fn from(err: crate::clients::MailerError) -> Self {
        Self::Email(err.to_string())
    }
}

/// Successful login or OTP verification: a signed session token plus the
/// identity it certifies.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub token: String,
    pub user_id: i32,
    pub username: String,
    pub role: Role,
}

/// What a password login produced. With OTP enabled the caller gets no
/// token until the code round-trip completes.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Session(SessionInfo),
    OtpRequired,
}

#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct UpdateUserRequest {
    pub username: String,
    pub email: String,
    pub role: Role,
}

/// An answer submitted during password setup, keyed by question id.
#[derive(Debug, Clone)]
pub struct SecurityAnswerInput {
    pub question_id: i32,
    pub answer: String,
}

/// Domain service trait for the authentication core.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Verifies credentials. Returns a session directly, or `OtpRequired`
    /// when the second factor is enabled and a code has been dispatched.
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError>;

    /// Verifies a one-time code issued by `login` and returns the session.
    async fn verify_otp(&self, username: &str, code: &str) -> Result<SessionInfo, AuthError>;

    /// Creates an inactive account and mails a password-setup token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Conflict`] when the username or email is taken
    /// and [`AuthError::Email`] when the setup mail cannot be delivered.
    async fn create_user(&self, request: CreateUserRequest) -> Result<User, AuthError>;

    async fn update_user(&self, id: i32, request: UpdateUserRequest) -> Result<(), AuthError>;

    /// Deletes an account, enforcing the super-admin protection rules.
    async fn delete_user(&self, target_id: i32, acting_username: &str) -> Result<(), AuthError>;

    /// Activates or deactivates an account. The super admin can never be
    /// deactivated.
    async fn update_user_status(&self, target_id: i32, active: bool) -> Result<(), AuthError>;

    /// Sets a new password for any account, including the super admin.
    async fn change_password(&self, target_id: i32, new_password: &str) -> Result<(), AuthError>;

    /// Whether a setup token is live (exists, unused, unexpired).
    async fn validate_setup_token(&self, token: &str) -> Result<bool, AuthError>;

    /// Redeems a setup token: stores the password, activates the account,
    /// and records the security answers. All-or-nothing.
    async fn complete_password_setup(
        &self,
        token: &str,
        new_password: &str,
        answers: Vec<SecurityAnswerInput>,
    ) -> Result<(), AuthError>;

    async fn get_active_security_questions(&self) -> Result<Vec<SecurityQuestion>, AuthError>;

    async fn list_users(&self) -> Result<Vec<User>, AuthError>;
}
