//! Purchasable photo belonging to one gallery.

use sea_orm::entity::prelude::*;

/// One photo of a gallery.
///
/// `image` and `watermarked_image` are media-relative storage paths.
/// Prices are stored in minor units so that every backend keeps them exact;
/// use [`Model::price`] for the decimal value.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "photo")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub gallery_id: i32,
    #[sea_orm(column_type = "Text")]
    pub image: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub watermarked_image: Option<String>,
    pub price_cents: i64,
    pub uploaded_at: DateTimeWithTimeZone,
}

impl Model {
    /// Unit price with two decimal places.
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::gallery::Entity",
        from = "Column::GalleryId",
        to = "super::gallery::Column::Id",
        on_delete = "Cascade"
    )]
    Gallery,
}

impl Related<super::gallery::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Gallery.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
