use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use proof_gallery::fulfillment::{
    DisabledGateway, PaymentGateway, StripeGateway, TracingMailer,
};
use proof_gallery::http::{app, AppState};
use proof_gallery::migration::{Migrator, MigratorTrait};
use proof_gallery::{Config, SeaOrmStore};
use sea_orm::{ConnectOptions, Database};
use tower_sessions::ExpiredDeletion;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    // A missing .env file is fine; the environment may be set directly.
    dotenv().ok();

    let config = Config::from_env().context("loading configuration")?;
    info!(?config, "configuration loaded");

    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(10)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(10))
        .max_lifetime(Duration::from_secs(10 * 60))
        .sqlx_logging(false);
    let db = Database::connect(opt)
        .await
        .context("connecting to database")?;
    Migrator::up(&db, None)
        .await
        .context("running migrations")?;
    info!("database ready");

    let store = SeaOrmStore::new(db.clone());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            if let Err(e) = store.delete_expired().await {
                warn!(error = %e, "expired session cleanup failed");
            }
        }
    });

    let gateway: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeGateway::new(key.clone())),
        None => {
            warn!("STRIPE_SECRET_KEY not set, checkout is disabled");
            Arc::new(DisabledGateway)
        }
    };

    let addr = config.bind_addr;
    let state = AppState::new(config, db, gateway, Arc::new(TracingMailer));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server starting on http://{}", addr);
    axum::serve(listener, app(state).into_make_service()).await?;

    Ok(())
}
