use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(OtpChallenges)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(PasswordSetupTokens)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Verify-time lookups are always "newest unused challenge for user".
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_otp_challenges_user_id")
                    .table(OtpChallenges)
                    .col(crate::entities::otp_challenges::Column::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OtpChallenges).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PasswordSetupTokens).to_owned())
            .await?;

        Ok(())
    }
}
