use crate::trainings;
use sea_orm::prelude::*;
use uuid::Uuid;

/// Grants a directory principal (user or group objectId) access to a training.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "access_control_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub training_id: i32,
    pub principal_id: Uuid,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "trainings::Entity",
        from = "Column::TrainingId",
        to = "trainings::Column::Id"
    )]
    Training,
}

impl Related<trainings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Training.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
