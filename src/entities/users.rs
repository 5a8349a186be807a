use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub username: String,

    #[sea_orm(unique)]
    pub email: String,

    /// Argon2id password hash, or a legacy SHA-256 hex digest for accounts
    /// migrated from the previous system. Empty until password setup completes.
    pub password_hash: String,

    /// "admin" or "operator"
    pub role: String,

    pub active: bool,

    /// The single protected account seeded at install time. Cannot be
    /// deleted or deactivated, and is the only account allowed to delete
    /// other admins.
    pub is_super_admin: bool,

    pub last_login_at: Option<String>,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
