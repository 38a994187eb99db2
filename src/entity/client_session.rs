//! Persisted tower-sessions record of one browser client.

use sea_orm::entity::prelude::*;

/// A client session as stored by [`SeaOrmStore`](crate::session_store::SeaOrmStore).
///
/// | Column      | Type          | Description                          |
/// |-------------|---------------|--------------------------------------|
/// | id          | TEXT (PK)     | Session id                           |
/// | data        | BLOB / BYTEA  | MessagePack-encoded session record   |
/// | expiry_date | TIMESTAMPTZ   | Instant after which the row is dead  |
///
/// The record carries the cart and the gallery-access flag.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "client_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    pub data: Vec<u8>,
    pub expiry_date: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
