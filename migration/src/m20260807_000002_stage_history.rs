use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Deal {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum DealStageHistory {
    Table,
    Id,
    DealId,
    FromStage,
    ToStage,
    FromIndex,
    ToIndex,
    Note,
    ChangedBy,
    ChangedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DealStageHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealStageHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealStageHistory::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealStageHistory::FromStage).uuid())
                    .col(ColumnDef::new(DealStageHistory::ToStage).uuid().not_null())
                    .col(ColumnDef::new(DealStageHistory::FromIndex).integer())
                    .col(ColumnDef::new(DealStageHistory::ToIndex).integer().not_null())
                    .col(ColumnDef::new(DealStageHistory::Note).string_len(512))
                    .col(ColumnDef::new(DealStageHistory::ChangedBy).uuid())
                    .col(
                        ColumnDef::new(DealStageHistory::ChangedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stage_history_deal")
                            .from(DealStageHistory::Table, DealStageHistory::DealId)
                            .to(Deal::Table, Deal::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stage_history_deal")
                    .table(DealStageHistory::Table)
                    .col(DealStageHistory::DealId)
                    .col(DealStageHistory::ChangedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DealStageHistory::Table).to_owned())
            .await
    }
}
