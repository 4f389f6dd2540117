use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::task;

/// Directed edge: `dependent_id` waits on `prerequisite_id`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "task_dependencies")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub dependent_id: i64,
    pub prerequisite_id: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Dependent,
    Prerequisite,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::Dependent => Entity::belongs_to(task::Entity)
                .from(Column::DependentId)
                .to(task::Column::Id)
                .into(),
            Self::Prerequisite => Entity::belongs_to(task::Entity)
                .from(Column::PrerequisiteId)
                .to(task::Column::Id)
                .into(),
        }
    }
}

impl ActiveModelBehavior for ActiveModel {}
