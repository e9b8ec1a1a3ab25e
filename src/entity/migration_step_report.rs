//! MigrationStepReport entity for SeaORM.
//!
//! `step_id` carries no foreign key: a report outlives the removal of its step.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "migration_step_reports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub report_id: Uuid,
    pub step_id: Uuid,
    pub status: String,
    #[sea_orm(column_type = "Text")]
    pub log: String,
    pub timestamp: DateTimeUtc,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::migration_report::Entity",
        from = "Column::ReportId",
        to = "super::migration_report::Column::Id",
        on_delete = "Cascade"
    )]
    Report,
}

impl Related<super::migration_report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Report.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
