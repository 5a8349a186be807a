use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

const DEFAULT_QUESTIONS: &[&str] = &[
    "What was the name of your first pet?",
    "What city were you born in?",
    "What was the model of your first car?",
    "What is your mother's maiden name?",
    "What was the name of your primary school?",
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(SecurityQuestions)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(SecurityAnswers)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        let now = chrono::Utc::now().to_rfc3339();
        for question in DEFAULT_QUESTIONS {
            let insert = sea_orm_migration::sea_query::Query::insert()
                .into_table(SecurityQuestions)
                .columns([
                    crate::entities::security_questions::Column::Question,
                    crate::entities::security_questions::Column::Active,
                    crate::entities::security_questions::Column::CreatedAt,
                ])
                .values_panic([(*question).into(), true.into(), now.clone().into()])
                .to_owned();

            manager.exec_stmt(insert).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SecurityAnswers).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SecurityQuestions).to_owned())
            .await?;

        Ok(())
    }
}
