use anyhow::{Context, Result};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::entities::{security_answers, security_questions};

pub struct SecurityRepository {
    conn: DatabaseConnection,
}

impl SecurityRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn list_active_questions(&self) -> Result<Vec<security_questions::Model>> {
        security_questions::Entity::find()
            .filter(security_questions::Column::Active.eq(true))
            .order_by_asc(security_questions::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list security questions")
    }

    /// Which of the given question ids exist and are active. Used to reject
    /// a setup request in full before anything is written.
    pub async fn active_question_ids(&self, ids: &[i32]) -> Result<Vec<i32>> {
        let rows = security_questions::Entity::find()
            .filter(security_questions::Column::Id.is_in(ids.iter().copied()))
            .filter(security_questions::Column::Active.eq(true))
            .all(&self.conn)
            .await
            .context("Failed to query security questions by id")?;

        Ok(rows.into_iter().map(|q| q.id).collect())
    }

    pub async fn delete_answers_for_user(&self, user_id: i32) -> Result<()> {
        security_answers::Entity::delete_many()
            .filter(security_answers::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await
            .context("Failed to delete security answers for user")?;

        Ok(())
    }
}
