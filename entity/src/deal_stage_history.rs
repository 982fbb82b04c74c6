use sea_orm::entity::prelude::*;

/// Append-only record of one committed deal move.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "deal_stage_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub deal_id: Uuid,
    pub from_stage: Option<Uuid>,
    pub to_stage: Uuid,
    pub from_index: Option<i32>,
    pub to_index: i32,
    pub note: Option<String>,
    pub changed_by: Option<Uuid>,
    pub changed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::deal::Entity",
        from = "Column::DealId",
        to = "super::deal::Column::Id",
        on_delete = "Cascade"
    )]
    Deal,
}

impl Related<super::deal::Entity> for Entity {
    fn to() -> RelationDef { Relation::Deal.def() }
}

impl ActiveModelBehavior for ActiveModel {}
