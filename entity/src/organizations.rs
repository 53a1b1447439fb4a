use sea_orm::prelude::{DateTimeWithTimeZone, *};
use uuid::Uuid;

/// A tenant that signed up for the service. `issuer` starts as a random GUID
/// state marker and is rewritten to the tenant issuer URL exactly once, when
/// admin consent completes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub issuer: String,
    pub created_on: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        panic!("no relations")
    }
}

impl Model {
    /// An organization is claimed once its issuer has been rewritten to a
    /// tenant issuer URL.
    pub fn is_claimed(&self) -> bool {
        self.issuer.starts_with("https")
    }
}

impl ActiveModelBehavior for ActiveModel {}
