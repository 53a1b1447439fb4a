use crate::access_control_entries;
use sea_orm::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "trainings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub description: String,
    pub created_by: Uuid,
    pub organization_id: Uuid,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "access_control_entries::Entity")]
    SharedWith,
}

impl Related<access_control_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SharedWith.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
