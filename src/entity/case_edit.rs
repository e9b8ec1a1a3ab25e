//! CaseEdit (outbox) entity for SeaORM.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "case_edits")]
pub struct Model {
    /// UUIDv7, creation ordered
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub case_id: i64,
    pub edit_type: String,
    /// Empty for single-instance intents
    pub target_digest: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub params: JsonValue,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::case::Entity",
        from = "Column::CaseId",
        to = "super::case::Column::Id",
        on_delete = "Cascade"
    )]
    Case,
}

impl Related<super::case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Case.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
