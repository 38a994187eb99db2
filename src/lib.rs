//! # Proof Gallery
//!
//! Password-gated photo proofing galleries for photography clients, built on
//! [axum](https://crates.io/crates/axum),
//! [tower-sessions](https://crates.io/crates/tower-sessions) and
//! [Sea-ORM](https://crates.io/crates/sea-orm).
//!
//! ## Features
//!
//! - Photos are addressed in URLs by authenticated, encrypted path tokens,
//!   never by their storage path
//! - Previews carry a tiled, semi-transparent logo watermark, rendered once
//!   and cached on disk
//! - Per-client carts kept in database-backed sessions, with exact decimal
//!   totals
//! - After payment the purchased originals are zipped and the download link
//!   is emailed to the customer
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use proof_gallery::fulfillment::{DisabledGateway, TracingMailer};
//! use proof_gallery::http::{app, AppState};
//! use proof_gallery::migration::{Migrator, MigratorTrait};
//! use proof_gallery::Config;
//! use sea_orm::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let db = Database::connect(&config.database_url).await?;
//! Migrator::up(&db, None).await?;
//!
//! let state = AppState::new(config, db, Arc::new(DisabledGateway), Arc::new(TracingMailer));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app(state)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Rendering a watermark directly
//!
//! ```no_run
//! use proof_gallery::watermark::{composite, WatermarkPolicy};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = image::open("photo.jpg")?.to_rgba8();
//! let logo = image::open("logo.png")?.to_rgba8();
//! let preview = composite(&source, &logo, &WatermarkPolicy::default());
//! preview.save("preview.jpg")?;
//! # Ok(())
//! # }
//! ```

pub mod cart;
pub mod config;
pub mod entity;
pub mod error;
pub mod fulfillment;
pub mod gallery;
pub mod http;
pub mod migration;
pub mod session_store;
pub mod storage;
pub mod token;
pub mod watermark;

pub use cart::{Cart, PricePolicy};
pub use config::Config;
pub use error::{GalleryError, Result};
pub use gallery::GalleryService;
pub use session_store::SeaOrmStore;
pub use token::PathTokenCodec;

/// Session type for reading and writing client session data.
///
/// Re-exported from `tower-sessions` for convenience.
pub use tower_sessions::Session;

/// Fresh in-memory SQLite database with every migration applied.
///
/// A single pooled connection, so that every query sees the same database.
#[cfg(test)]
pub(crate) async fn test_db() -> sea_orm::DatabaseConnection {
    use migration::{Migrator, MigratorTrait};

    let mut opt = sea_orm::ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = sea_orm::Database::connect(opt).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}
