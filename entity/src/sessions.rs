use sea_orm::prelude::{DateTimeWithTimeZone, *};
use uuid::Uuid;

/// A signed-in directory user. Carries the claims the routes need (objectId,
/// tenant, groups, application roles) plus the refresh token used to mint
/// on-behalf ARM tokens later in the session.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_object_id: Uuid,
    pub tenant_id: Uuid,
    pub unique_name: String,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub group_ids: Vec<String>,
    pub refresh_token: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        panic!("no relations")
    }
}

impl ActiveModelBehavior for ActiveModel {}
