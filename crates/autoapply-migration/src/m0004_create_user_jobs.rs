use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UserJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(UserJobs::UserId).uuid().not_null())
                    .col(ColumnDef::new(UserJobs::JobId).uuid().not_null())
                    .col(ColumnDef::new(UserJobs::AutomationId).uuid().null())
                    .col(
                        ColumnDef::new(UserJobs::Status)
                            .string()
                            .not_null()
                            .default("saved"),
                    )
                    .col(
                        ColumnDef::new(UserJobs::AppliedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(UserJobs::Notes).text().null())
                    .col(ColumnDef::new(UserJobs::ResumePath).string().null())
                    .col(ColumnDef::new(UserJobs::CoverLetterPath).string().null())
                    .col(
                        ColumnDef::new(UserJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_jobs_user")
                            .from(UserJobs::Table, UserJobs::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_jobs_job")
                            .from(UserJobs::Table, UserJobs::JobId)
                            .to(Jobs::Table, Jobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    // Deleting an automation keeps the user's history, only the
                    // back-reference goes away.
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_jobs_automation")
                            .from(UserJobs::Table, UserJobs::AutomationId)
                            .to(Automations::Table, Automations::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_user_jobs_user_job")
                    .table(UserJobs::Table)
                    .col(UserJobs::UserId)
                    .col(UserJobs::JobId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Quota counting filters on (automation_id, status, applied_at).
        manager
            .create_index(
                Index::create()
                    .name("idx_user_jobs_automation_status_applied_at")
                    .table(UserJobs::Table)
                    .col(UserJobs::AutomationId)
                    .col(UserJobs::Status)
                    .col(UserJobs::AppliedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_user_jobs_automation_status_applied_at")
                    .table(UserJobs::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("uq_user_jobs_user_job")
                    .table(UserJobs::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(UserJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Automations {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum UserJobs {
    Table,
    Id,
    UserId,
    JobId,
    AutomationId,
    Status,
    AppliedAt,
    Notes,
    ResumePath,
    CoverLetterPath,
    CreatedAt,
    UpdatedAt,
}
