use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use crate::entities::otp_challenges::Model as OtpChallenge;
pub use crate::entities::password_setup_tokens::Model as PasswordSetupToken;
pub use crate::entities::security_questions::Model as SecurityQuestion;
pub use repositories::user::{Role, User};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn otp_repo(&self) -> repositories::otp::OtpRepository {
        repositories::otp::OtpRepository::new(self.conn.clone())
    }

    fn setup_token_repo(&self) -> repositories::setup_token::SetupTokenRepository {
        repositories::setup_token::SetupTokenRepository::new(self.conn.clone())
    }

    fn security_repo(&self) -> repositories::security::SecurityRepository {
        repositories::security::SecurityRepository::new(self.conn.clone())
    }

    // Users

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.user_repo().get_by_username(username).await
    }

    pub async fn get_user_by_username_with_password(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>> {
        self.user_repo()
            .get_by_username_with_password(username)
            .await
    }

    pub async fn get_user_by_id(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn get_user_by_id_with_password(&self, id: i32) -> Result<Option<(User, String)>> {
        self.user_repo().get_by_id_with_password(id).await
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        self.user_repo().username_exists(username).await
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        self.user_repo().email_exists(email).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.user_repo().list_all().await
    }

    pub async fn create_user(&self, username: &str, email: &str, role: Role) -> Result<User> {
        self.user_repo().create(username, email, role).await
    }

    pub async fn update_user_password_hash(&self, id: i32, password_hash: &str) -> Result<()> {
        self.user_repo()
            .update_password_hash(id, password_hash)
            .await
    }

    pub async fn set_user_active(&self, id: i32, active: bool) -> Result<()> {
        self.user_repo().set_active(id, active).await
    }

    pub async fn touch_last_login(&self, id: i32) -> Result<()> {
        self.user_repo().touch_last_login(id).await
    }

    pub async fn update_user_profile(
        &self,
        id: i32,
        username: &str,
        email: &str,
        role: Role,
    ) -> Result<()> {
        self.user_repo()
            .update_profile(id, username, email, role)
            .await
    }

    /// Remove a user and everything it owns. Children go first so a
    /// relational backend with foreign keys never sees an orphan.
    pub async fn delete_user_cascade(&self, id: i32) -> Result<bool> {
        self.setup_token_repo().delete_all_for_user(id).await?;
        self.otp_repo().delete_all_for_user(id).await?;
        self.security_repo().delete_answers_for_user(id).await?;
        self.user_repo().delete(id).await
    }

    // OTP challenges

    pub async fn latest_unused_otp(&self, user_id: i32) -> Result<Option<OtpChallenge>> {
        self.otp_repo().latest_unused(user_id).await
    }

    pub async fn delete_unused_otps(&self, user_id: i32) -> Result<()> {
        self.otp_repo().delete_unused_for_user(user_id).await
    }

    pub async fn create_otp(
        &self,
        user_id: i32,
        code_hash: &str,
        expires_at: &str,
    ) -> Result<OtpChallenge> {
        self.otp_repo().create(user_id, code_hash, expires_at).await
    }

    pub async fn increment_otp_attempts(&self, id: i32) -> Result<i32> {
        self.otp_repo().increment_attempts(id).await
    }

    pub async fn mark_otp_used(&self, id: i32) -> Result<()> {
        self.otp_repo().mark_used(id).await
    }

    pub async fn delete_otp(&self, id: i32) -> Result<()> {
        self.otp_repo().delete(id).await
    }

    // Password setup tokens

    pub async fn replace_setup_token(
        &self,
        user_id: i32,
        token: &str,
        expires_at: &str,
    ) -> Result<PasswordSetupToken> {
        self.setup_token_repo()
            .replace_for_user(user_id, token, expires_at)
            .await
    }

    pub async fn find_unused_setup_token(&self, token: &str) -> Result<Option<PasswordSetupToken>> {
        self.setup_token_repo().find_unused(token).await
    }

    pub async fn complete_password_setup(
        &self,
        token_id: i32,
        user_id: i32,
        password_hash: String,
        answer_hashes: Vec<(i32, String)>,
    ) -> Result<()> {
        self.setup_token_repo()
            .complete_setup(token_id, user_id, password_hash, answer_hashes)
            .await
    }

    // Security questions

    pub async fn list_active_security_questions(&self) -> Result<Vec<SecurityQuestion>> {
        self.security_repo().list_active_questions().await
    }

    pub async fn active_security_question_ids(&self, ids: &[i32]) -> Result<Vec<i32>> {
        self.security_repo().active_question_ids(ids).await
    }
}
