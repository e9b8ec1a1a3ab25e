//! MigrationReport entity for SeaORM.
//!
//! Status and log are derived from the step reports, never written by clients.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "migration_reports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub migration_id: Uuid,
    pub instance_id: Uuid,
    pub status: String,
    #[sea_orm(column_type = "Text")]
    pub log: String,
    pub timestamp: DateTimeUtc,
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
    #[sea_orm(
        belongs_to = "super::instance::Entity",
        from = "Column::InstanceId",
        to = "super::instance::Column::Id",
        on_delete = "Cascade"
    )]
    Instance,
    #[sea_orm(has_many = "super::migration_step_report::Entity")]
    StepReports,
}

impl Related<super::migration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Migration.def()
    }
}

impl Related<super::instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instance.def()
    }
}

impl Related<super::migration_step_report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StepReports.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
