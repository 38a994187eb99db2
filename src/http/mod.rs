//! HTTP surface: routes, shared state and the client-session layer.
//!
//! | Method | Path                         | Handler                         |
//! |--------|------------------------------|---------------------------------|
//! | GET    | `/`                          | login form                      |
//! | POST   | `/gallery/login`             | password → gallery redirect     |
//! | GET    | `/gallery/{access_token}`    | photo list with path tokens     |
//! | GET    | `/image/{token}`             | watermarked preview             |
//! | POST   | `/cart/add/{photo_id}`       | `{ok, count}`                   |
//! | POST   | `/cart/remove/{photo_id}`    | `{ok, count}`                   |
//! | POST   | `/cart/delete/{photo_id}`    | `{ok, count}`                   |
//! | GET    | `/cart/summary`              | priced cart lines               |
//! | POST   | `/checkout/start`            | redirect to the payment page    |
//! | GET    | `/checkout/success`          | fulfillment result              |

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sea_orm::DatabaseConnection;
use time::Duration;
use tower_sessions::{Expiry, SessionManagerLayer};

use crate::config::Config;
use crate::fulfillment::{FulfillmentPipeline, Mailer, PaymentGateway};
use crate::gallery::GalleryService;
use crate::session_store::SeaOrmStore;
use crate::storage::MediaStorage;
use crate::token::PathTokenCodec;
use crate::watermark::{Compositor, DerivedImageCache};

pub use error::ApiError;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gallery: GalleryService,
    pub pipeline: FulfillmentPipeline,
}

impl AppState {
    /// Wires the services from configuration and the external collaborators.
    pub fn new(
        config: Config,
        db: DatabaseConnection,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let config = Arc::new(config);
        let storage = MediaStorage::new(&config.media_root);
        let compositor = Compositor::new(&config.logo_path, config.watermark);
        let cache = DerivedImageCache::new(storage.clone(), compositor);
        let codec = Arc::new(PathTokenCodec::new(&config.token_secret));

        let gallery = GalleryService::new(db, storage, codec, cache)
            .with_eager_watermark(config.eager_watermark);
        let pipeline = FulfillmentPipeline::new(gallery.clone(), gateway, mailer, config.clone());

        Self {
            config,
            gallery,
            pipeline,
        }
    }
}

/// Routes without the session layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/gallery/login", post(handlers::login))
        .route("/gallery/{access_token}", get(handlers::gallery_view))
        .route("/image/{token}", get(handlers::image))
        .route("/cart/add/{photo_id}", post(handlers::cart_add))
        .route("/cart/remove/{photo_id}", post(handlers::cart_remove))
        .route("/cart/delete/{photo_id}", post(handlers::cart_delete))
        .route("/cart/summary", get(handlers::cart_summary))
        .route("/checkout/start", post(handlers::checkout_start))
        .route("/checkout/success", get(handlers::checkout_success))
        .with_state(state)
}

/// The complete application: routes plus client sessions persisted in the
/// same database.
pub fn app(state: AppState) -> Router {
    let store = SeaOrmStore::new(state.gallery.db().clone());
    let secure = state.config.public_base_url.starts_with("https://");
    let session_layer = SessionManagerLayer::new(store)
        .with_secure(secure)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            state.config.session_inactivity_hours,
        )));

    router(state).layer(session_layer)
}
