//! Password-gated gallery of one client's photos.

use sea_orm::entity::prelude::*;

/// A client-facing gallery.
///
/// | Column       | Type               | Description                              |
/// |--------------|--------------------|------------------------------------------|
/// | id           | INTEGER (PK)       | Gallery id                               |
/// | name         | TEXT               | Display name, slugged into storage paths |
/// | password     | TEXT               | Opaque access secret                     |
/// | access_token | TEXT (unique)      | Current gallery URL token                |
/// | created_at   | TIMESTAMPTZ        | Creation time                            |
///
/// `access_token` is replaced on every successful password check, which
/// invalidates every gallery URL handed out before.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "gallery")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub password: String,
    #[sea_orm(column_type = "Text", unique)]
    pub access_token: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::photo::Entity")]
    Photo,
}

impl Related<super::photo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Photo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
