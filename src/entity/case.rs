//! Case entity for SeaORM.
//!
//! Local mirror of a tracker case. The primary key is the tracker's own id.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "cases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub title: String,
    pub description: String,
    pub tracker_project: Option<String>,
    pub area: Option<String>,
    pub project_id: Option<Uuid>,
    pub release_id: Uuid,
    pub modified_at: Option<DateTimeUtc>,
    /// JSON array of tag strings
    #[sea_orm(column_type = "JsonBinary")]
    pub tags: JsonValue,
    pub revision: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Tags as plain strings; non-string entries are ignored.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::release::Entity",
        from = "Column::ReleaseId",
        to = "super::release::Column::Id"
    )]
    Release,
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "SetNull"
    )]
    Project,
    #[sea_orm(has_one = "super::migration::Entity")]
    Migration,
    #[sea_orm(has_many = "super::case_edit::Entity")]
    Edits,
}

impl Related<super::release::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Release.def()
    }
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::migration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Migration.def()
    }
}

impl Related<super::case_edit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Edits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
