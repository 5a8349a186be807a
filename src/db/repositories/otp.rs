use anyhow::{Context, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::otp_challenges;

pub struct OtpRepository {
    conn: DatabaseConnection,
}

impl OtpRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Newest unused challenge for the user, if any. Expiry is the caller's
    /// concern; an expired row here is treated the same as no row.
    pub async fn latest_unused(&self, user_id: i32) -> Result<Option<otp_challenges::Model>> {
        otp_challenges::Entity::find()
            .filter(otp_challenges::Column::UserId.eq(user_id))
            .filter(otp_challenges::Column::Used.eq(false))
            .order_by_desc(otp_challenges::Column::Id)
            .one(&self.conn)
            .await
            .context("Failed to query OTP challenge")
    }

    /// Remove every unused challenge for the user. Issuing a fresh code
    /// always replaces whatever was pending.
    pub async fn delete_unused_for_user(&self, user_id: i32) -> Result<()> {
        otp_challenges::Entity::delete_many()
            .filter(otp_challenges::Column::UserId.eq(user_id))
            .filter(otp_challenges::Column::Used.eq(false))
            .exec(&self.conn)
            .await
            .context("Failed to delete pending OTP challenges")?;

        Ok(())
    }

    pub async fn create(
        &self,
        user_id: i32,
        code_hash: &str,
        expires_at: &str,
    ) -> Result<otp_challenges::Model> {
        let now = chrono::Utc::now().to_rfc3339();

        let model = otp_challenges::ActiveModel {
            user_id: Set(user_id),
            code_hash: Set(code_hash.to_string()),
            expires_at: Set(expires_at.to_string()),
            attempts: Set(0),
            used: Set(false),
            created_at: Set(now),
            ..Default::default()
        };

        model
            .insert(&self.conn)
            .await
            .context("Failed to insert OTP challenge")
    }

    /// Increment the attempt counter, returning the new count. The bump runs
    /// as a single SQL update so concurrent verifications cannot both read
    /// the same value and lose a count.
    pub async fn increment_attempts(&self, id: i32) -> Result<i32> {
        otp_challenges::Entity::update_many()
            .col_expr(
                otp_challenges::Column::Attempts,
                Expr::col(otp_challenges::Column::Attempts).add(1),
            )
            .filter(otp_challenges::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to increment OTP attempts")?;

        let challenge = otp_challenges::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to re-read OTP challenge")?
            .with_context(|| format!("OTP challenge {id} not found"))?;

        Ok(challenge.attempts)
    }

    pub async fn mark_used(&self, id: i32) -> Result<()> {
        let challenge = otp_challenges::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query OTP challenge")?
            .with_context(|| format!("OTP challenge {id} not found"))?;

        let mut active: otp_challenges::ActiveModel = challenge.into();
        active.used = Set(true);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn delete(&self, id: i32) -> Result<()> {
        otp_challenges::Entity::delete_by_id(id)
            .exec(&self.conn)
            .await
            .context("Failed to delete OTP challenge")?;

        Ok(())
    }

    pub async fn delete_all_for_user(&self, user_id: i32) -> Result<()> {
        otp_challenges::Entity::delete_many()
            .filter(otp_challenges::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await
            .context("Failed to delete OTP challenges for user")?;

        Ok(())
    }
}
