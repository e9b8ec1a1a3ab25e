//! MigrationStep entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "migration_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub migration_id: Uuid,
    /// pre_deploy, post_deploy or final
    pub phase: String,
    /// mysql, pgsql, python or sh
    pub step_type: String,
    #[sea_orm(column_type = "Text")]
    pub code: String,
    pub path: Option<String>,
    pub position: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::migration::Entity",
        from = "Column::MigrationId",
        to = "super::migration::Column::Id",
        on_delete = "Cascade"
    )]
    Migration,
}

impl Related<super::migration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Migration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
