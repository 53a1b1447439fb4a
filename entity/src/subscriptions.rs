use sea_orm::prelude::{DateTimeWithTimeZone, *};
use uuid::Uuid;

/// A connected Azure subscription. A row exists only while the service
/// principal's role assignment on the subscription is believed granted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub directory_id: Uuid,
    pub connected_on: DateTimeWithTimeZone,
    pub connected_by: String,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        panic!("no relations")
    }
}

impl ActiveModelBehavior for ActiveModel {}
