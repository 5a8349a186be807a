use anyhow::{Context, Result};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};

use crate::entities::users;

/// Closed role set. Unknown role strings in storage or in token claims are
/// rejected rather than passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

/// User data returned from the repository (without the password hash)
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub is_super_admin: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<users::Model> for User {
    type Error = anyhow::Error;

    fn try_from(model: users::Model) -> Result<Self> {
        let role = Role::parse(&model.role)
            .with_context(|| format!("Unrecognized role '{}' for user {}", model.role, model.id))?;

        Ok(Self {
            id: model.id,
            username: model.username,
            email: model.email,
            role,
            active: model.active,
            is_super_admin: model.is_super_admin,
            last_login_at: model.last_login_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn lower_username_eq(username: &str) -> sea_orm::sea_query::SimpleExpr {
        Expr::expr(Func::lower(Expr::col((
            users::Entity,
            users::Column::Username,
        ))))
        .eq(username.to_lowercase())
    }

    fn lower_email_eq(email: &str) -> sea_orm::sea_query::SimpleExpr {
        Expr::expr(Func::lower(Expr::col((users::Entity, users::Column::Email))))
            .eq(email.to_lowercase())
    }

    /// Get user by username. Lookups are case-insensitive throughout.
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(Self::lower_username_eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user by username")?;

        user.map(User::try_from).transpose()
    }

    /// Get user by username along with the stored password hash
    /// (needed for verification and legacy-hash migration).
    pub async fn get_by_username_with_password(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>> {
        let user = users::Entity::find()
            .filter(Self::lower_username_eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user by username")?;

        user.map(|u| {
            let password_hash = u.password_hash.clone();
            Ok((User::try_from(u)?, password_hash))
        })
        .transpose()
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        user.map(User::try_from).transpose()
    }

    pub async fn get_by_id_with_password(&self, id: i32) -> Result<Option<(User, String)>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        user.map(|u| {
            let password_hash = u.password_hash.clone();
            Ok((User::try_from(u)?, password_hash))
        })
        .transpose()
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let count = users::Entity::find()
            .filter(Self::lower_username_eq(username))
            .count(&self.conn)
            .await
            .context("Failed to check username existence")?;

        Ok(count > 0)
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let count = users::Entity::find()
            .filter(Self::lower_email_eq(email))
            .count(&self.conn)
            .await
            .context("Failed to check email existence")?;

        Ok(count > 0)
    }

    pub async fn list_all(&self) -> Result<Vec<User>> {
        let users = users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        users.into_iter().map(User::try_from).collect()
    }

    /// Create a new account. It starts inactive with no password; the user
    /// activates it by completing password setup.
    pub async fn create(&self, username: &str, email: &str, role: Role) -> Result<User> {
        let now = chrono::Utc::now().to_rfc3339();

        let model = users::ActiveModel {
            username: Set(username.to_string()),
            email: Set(email.to_string()),
            password_hash: Set(String::new()),
            role: Set(role.as_str().to_string()),
            active: Set(false),
            is_super_admin: Set(false),
            last_login_at: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        let inserted = model
            .insert(&self.conn)
            .await
            .context("Failed to insert user")?;

        User::try_from(inserted)
    }

    pub async fn update_password_hash(&self, id: i32, password_hash: &str) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for password update")?
            .with_context(|| format!("User {id} not found"))?;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(password_hash.to_string());
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn set_active(&self, id: i32, active_flag: bool) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for status update")?
            .with_context(|| format!("User {id} not found"))?;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.active = Set(active_flag);
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn touch_last_login(&self, id: i32) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for login timestamp")?
            .with_context(|| format!("User {id} not found"))?;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.last_login_at = Set(Some(now.clone()));
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn update_profile(
        &self,
        id: i32,
        username: &str,
        email: &str,
        role: Role,
    ) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for profile update")?
            .with_context(|| format!("User {id} not found"))?;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.username = Set(username.to_string());
        active.email = Set(email.to_string());
        active.role = Set(role.as_str().to_string());
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = users::Entity::delete_by_id(id)
            .exec(&self.conn)
            .await
            .context("Failed to delete user")?;

        Ok(result.rows_affected > 0)
    }
}
