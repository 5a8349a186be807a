use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::entities::{password_setup_tokens, security_answers, users};

pub struct SetupTokenRepository {
    conn: DatabaseConnection,
}

impl SetupTokenRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Replace any prior token for the user with a fresh one. At most one
    /// live token per user exists at any time.
    pub async fn replace_for_user(
        &self,
        user_id: i32,
        token: &str,
        expires_at: &str,
    ) -> Result<password_setup_tokens::Model> {
        password_setup_tokens::Entity::delete_many()
            .filter(password_setup_tokens::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await
            .context("Failed to delete prior setup tokens")?;

        let now = chrono::Utc::now().to_rfc3339();

        let model = password_setup_tokens::ActiveModel {
            user_id: Set(user_id),
            token: Set(token.to_string()),
            expires_at: Set(expires_at.to_string()),
            used: Set(false),
            created_at: Set(now),
            ..Default::default()
        };

        model
            .insert(&self.conn)
            .await
            .context("Failed to insert setup token")
    }

    /// Look up an unused token by value. Expiry is checked by the caller so
    /// that missing, expired, and already-used tokens all yield the same
    /// outcome.
    pub async fn find_unused(&self, token: &str) -> Result<Option<password_setup_tokens::Model>> {
        password_setup_tokens::Entity::find()
            .filter(password_setup_tokens::Column::Token.eq(token))
            .filter(password_setup_tokens::Column::Used.eq(false))
            .one(&self.conn)
            .await
            .context("Failed to query setup token")
    }

    /// Atomically finish password setup: store the hash, activate the user,
    /// record the hashed security answers, and burn the token. Runs in a
    /// single transaction so a failure leaves nothing half-applied.
    pub async fn complete_setup(
        &self,
        token_id: i32,
        user_id: i32,
        password_hash: String,
        answer_hashes: Vec<(i32, String)>,
    ) -> Result<()> {
        self.conn
            .transaction::<_, (), sea_orm::DbErr>(move |txn| {
                Box::pin(async move {
                    let now = chrono::Utc::now().to_rfc3339();

                    let user = users::Entity::find_by_id(user_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            sea_orm::DbErr::RecordNotFound(format!("User {user_id} not found"))
                        })?;

                    let mut active_user: users::ActiveModel = user.into();
                    active_user.password_hash = Set(password_hash);
                    active_user.active = Set(true);
                    active_user.updated_at = Set(now.clone());
                    active_user.update(txn).await?;

                    for (question_id, answer_hash) in answer_hashes {
                        let answer = security_answers::ActiveModel {
                            user_id: Set(user_id),
                            question_id: Set(question_id),
                            answer_hash: Set(answer_hash),
                            created_at: Set(now.clone()),
                            ..Default::default()
                        };
                        answer.insert(txn).await?;
                    }

                    let token = password_setup_tokens::Entity::find_by_id(token_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            sea_orm::DbErr::RecordNotFound(format!(
                                "Setup token {token_id} not found"
                            ))
                        })?;

                    let mut active_token: password_setup_tokens::ActiveModel = token.into();
                    active_token.used = Set(true);
                    active_token.update(txn).await?;

                    Ok(())
                })
            })
            .await
            .context("Password setup transaction failed")?;

        Ok(())
    }

    pub async fn delete_all_for_user(&self, user_id: i32) -> Result<()> {
        password_setup_tokens::Entity::delete_many()
            .filter(password_setup_tokens::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await
            .context("Failed to delete setup tokens for user")?;

        Ok(())
    }
}
