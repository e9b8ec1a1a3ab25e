//! Instance entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub description: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::migration_report::Entity")]
    MigrationReports,
    #[sea_orm(has_many = "super::deployment_report::Entity")]
    DeploymentReports,
}

impl Related<super::migration_report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MigrationReports.def()
    }
}

impl Related<super::deployment_report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeploymentReports.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
