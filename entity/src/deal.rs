use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "deal")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub value_cents: Option<i64>,
    pub currency: Option<String>,
    #[sea_orm(indexed)]
    pub stage_id: Uuid,
    /// Dense rank within the deal's stage, 0-based.
    pub sort_order: i32,
    /// Override of the stage's default probability (0..=100).
    pub probability: Option<i16>,
    pub status: Status,
    pub expected_close_date: Option<Date>,
    pub actual_close_date: Option<DateTimeWithTimeZone>,
    /// Reset every time `stage_id` changes, and only then.
    pub stage_entered_at: DateTimeWithTimeZone,
    pub last_stage_id: Option<Uuid>,
    pub is_locked: bool,
    pub lost_reason: Option<String>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub visible_to: Visibility,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTimeWithTimeZone>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stage::Entity",
        from = "Column::StageId",
        to = "super::stage::Column::Id"
    )]
    Stage,
}

impl Related<super::stage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stage.def()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum Status {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "won")]
    Won,
    #[sea_orm(string_value = "lost")]
    Lost,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum Visibility {
    #[sea_orm(string_value = "owner")]
    Owner,
    #[sea_orm(string_value = "team")]
    Team,
    #[sea_orm(string_value = "everyone")]
    Everyone,
}

impl ActiveModelBehavior for ActiveModel {}
