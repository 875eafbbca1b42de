use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Automations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Automations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Automations::UserId).uuid().not_null())
                    .col(ColumnDef::new(Automations::Name).string().not_null())
                    .col(ColumnDef::new(Automations::TargetTitles).text().null())
                    .col(ColumnDef::new(Automations::Locations).text().null())
                    .col(
                        ColumnDef::new(Automations::DailyLimit)
                            .integer()
                            .not_null()
                            .default(25),
                    )
                    .col(ColumnDef::new(Automations::Platforms).json().not_null())
                    .col(
                        ColumnDef::new(Automations::CoverLetterTemplate)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Automations::Status)
                            .string()
                            .not_null()
                            .default("paused"),
                    )
                    .col(
                        ColumnDef::new(Automations::TotalApplied)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Automations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Automations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automations_user")
                            .from(Automations::Table, Automations::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automations_user_id")
                    .table(Automations::Table)
                    .col(Automations::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automations_status")
                    .table(Automations::Table)
                    .col(Automations::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automations_status")
                    .table(Automations::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_automations_user_id")
                    .table(Automations::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Automations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Automations {
    Table,
    Id,
    UserId,
    Name,
    TargetTitles,
    Locations,
    DailyLimit,
    Platforms,
    CoverLetterTemplate,
    Status,
    TotalApplied,
    CreatedAt,
    UpdatedAt,
}
