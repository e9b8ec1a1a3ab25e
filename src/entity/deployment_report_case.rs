//! Join table between deployment reports and the cases they cover.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "deployment_report_cases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub deployment_report_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub case_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::deployment_report::Entity",
        from = "Column::DeploymentReportId",
        to = "super::deployment_report::Column::Id",
        on_delete = "Cascade"
    )]
    DeploymentReport,
    #[sea_orm(
        belongs_to = "super::case::Entity",
        from = "Column::CaseId",
        to = "super::case::Column::Id",
        on_delete = "Cascade"
    )]
    Case,
}

impl Related<super::deployment_report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeploymentReport.def()
    }
}

impl Related<super::case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Case.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
