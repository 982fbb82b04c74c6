use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Stage {
    Table,
    Id,
    Name,
    Color,
    SortOrder,
    Probability,
    IsWon,
    IsLost,
    RottenDays,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Deal {
    Table,
    Id,
    Title,
    ValueCents,
    Currency,
    StageId,
    SortOrder,
    Probability,
    Status,
    ExpectedCloseDate,
    ActualCloseDate,
    StageEnteredAt,
    LastStageId,
    IsLocked,
    LostReason,
    CompanyId,
    ContactId,
    VisibleTo,
    IsDeleted,
    DeletedAt,
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Stage::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Stage::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Stage::Name).string_len(64).not_null())
                    .col(ColumnDef::new(Stage::Color).string_len(32))
                    .col(ColumnDef::new(Stage::SortOrder).integer().not_null())
                    .col(ColumnDef::new(Stage::Probability).small_integer().not_null())
                    .col(
                        ColumnDef::new(Stage::IsWon)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Stage::IsLost)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Stage::RottenDays).integer())
                    .col(
                        ColumnDef::new(Stage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Stage::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Non-unique on purpose: range shifts during a move would transiently
        // collide with a non-deferred unique constraint. Density is an engine
        // invariant. The deal -> stage linkage is engine-enforced for the
        // same reason: soft-deleted deals keep their stage_id and may
        // outlive the stage row.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stage_sort_order")
                    .table(Stage::Table)
                    .col(Stage::SortOrder)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Deal::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deal::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deal::Title).string_len(256).not_null())
                    .col(ColumnDef::new(Deal::ValueCents).big_integer())
                    .col(ColumnDef::new(Deal::Currency).string_len(8))
                    .col(ColumnDef::new(Deal::StageId).uuid().not_null())
                    .col(ColumnDef::new(Deal::SortOrder).integer().not_null())
                    .col(ColumnDef::new(Deal::Probability).small_integer())
                    .col(ColumnDef::new(Deal::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Deal::ExpectedCloseDate).date())
                    .col(ColumnDef::new(Deal::ActualCloseDate).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Deal::StageEnteredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Deal::LastStageId).uuid())
                    .col(
                        ColumnDef::new(Deal::IsLocked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Deal::LostReason).string_len(512))
                    .col(ColumnDef::new(Deal::CompanyId).uuid())
                    .col(ColumnDef::new(Deal::ContactId).uuid())
                    .col(ColumnDef::new(Deal::VisibleTo).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Deal::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Deal::DeletedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Deal::CreatedBy).uuid())
                    .col(ColumnDef::new(Deal::UpdatedBy).uuid())
                    .col(
                        ColumnDef::new(Deal::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deal::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_stage_sort_order")
                    .table(Deal::Table)
                    .col(Deal::StageId)
                    .col(Deal::SortOrder)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_company")
                    .table(Deal::Table)
                    .col(Deal::CompanyId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Deal::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Stage::Table).to_owned())
            .await
    }
}
