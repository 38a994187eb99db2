use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Gallery::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Gallery::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Gallery::Name).text().not_null())
                    .col(ColumnDef::new(Gallery::Password).text().not_null())
                    .col(
                        ColumnDef::new(Gallery::AccessToken)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Gallery::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Photo::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Photo::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Photo::GalleryId).integer().not_null())
                    .col(ColumnDef::new(Photo::Image).text().not_null())
                    .col(ColumnDef::new(Photo::WatermarkedImage).text().null())
                    .col(
                        ColumnDef::new(Photo::PriceCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Photo::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_photo_gallery")
                            .from(Photo::Table, Photo::GalleryId)
                            .to(Gallery::Table, Gallery::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_photo_gallery_id")
                    .table(Photo::Table)
                    .col(Photo::GalleryId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Photo::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Gallery::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Gallery {
    Table,
    Id,
    Name,
    Password,
    AccessToken,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Photo {
    Table,
    Id,
    GalleryId,
    Image,
    WatermarkedImage,
    PriceCents,
    UploadedAt,
}
