//! Schema migrations.
//!
//! ```no_run
//! use proof_gallery::migration::{Migrator, MigratorTrait};
//!
//! # async fn example(db: &sea_orm::DatabaseConnection) -> Result<(), sea_orm::DbErr> {
//! Migrator::up(db, None).await?;
//! # Ok(())
//! # }
//! ```

pub use sea_orm_migration::prelude::*;

mod m20250601_000001_create_gallery_tables;
mod m20250601_000002_create_client_session_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    // Own migration table, so the schema can live next to other apps' migrations.
    fn migration_table_name() -> sea_orm::DynIden {
        Alias::new("proof_gallery_migrations").into_iden()
    }

    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_gallery_tables::Migration),
            Box::new(m20250601_000002_create_client_session_table::Migration),
        ]
    }
}
