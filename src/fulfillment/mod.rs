//! Checkout and post-payment fulfillment.
//!
//! ```text
//! cart ──start_checkout──▶ PaymentGateway (hosted page)
//!                                │ paid
//!                                ▼
//! cart ──fulfill──▶ originals ──zip──▶ zips/order_<key>.zip ──▶ Mailer
//! ```
//!
//! A failed archive aborts fulfillment and keeps the cart. Once the archive
//! exists the cart is cleared, whatever happens to the notification.

pub mod archive;
pub mod notify;
pub mod payment;

use std::sync::Arc;

use tower_sessions::Session;
use tracing::{error, info, warn};

use crate::cart::{minor_units, Cart};
use crate::config::Config;
use crate::error::{GalleryError, Result};
use crate::gallery::{run_blocking, GalleryService};

pub use archive::{archive_relative, build_archive};
pub use notify::{Mailer, Notification, TracingMailer};
pub use payment::{CheckoutLine, CheckoutOrder, DisabledGateway, PaymentGateway, StripeGateway};

/// What a paid checkout produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FulfillmentOutcome {
    /// Site-relative archive URL.
    pub zip_url: String,
    /// Number of purchased photos.
    pub count: usize,
    /// Customer email reported by the payment provider, if any.
    pub email: Option<String>,
    /// Set when an email was due but could not be sent.
    pub email_error: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fulfillment {
    /// The cart was empty or the session expired.
    EmptyCart,
    /// None of the cart's photos exist any more.
    NothingResolvable,
    Delivered(FulfillmentOutcome),
}

#[derive(Clone)]
pub struct FulfillmentPipeline {
    gallery: GalleryService,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    config: Arc<Config>,
}

impl FulfillmentPipeline {
    pub fn new(
        gallery: GalleryService,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            gallery,
            gateway,
            mailer,
            config,
        }
    }

    /// Builds a hosted checkout for the session's cart.
    ///
    /// Returns `None` when there is nothing to pay for, in which case the
    /// client belongs back on the home page.
    pub async fn start_checkout(&self, session: &Session) -> Result<Option<String>> {
        let cart = Cart::load(session).await?;
        if cart.is_empty() {
            return Ok(None);
        }

        let photos = self.gallery.photos_by_ids(&cart.ids()).await?;
        let mut lines = Vec::new();
        for (id, entry) in cart.entries() {
            if entry.qty == 0 || !photos.contains_key(&id) {
                continue;
            }
            let unit_amount = minor_units(entry.unit_price).ok_or_else(|| {
                GalleryError::InvalidInput(format!("price of photo {id} out of range"))
            })?;
            lines.push(CheckoutLine {
                name: format!("Photo #{id}"),
                unit_amount,
                quantity: entry.qty,
            });
        }
        if lines.is_empty() {
            return Ok(None);
        }

        let base = &self.config.public_base_url;
        let order = CheckoutOrder {
            currency: self.config.payment_currency.clone(),
            lines,
            success_url: format!("{base}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/"),
        };
        let url = self.gateway.create_checkout(&order).await?;
        info!(lines = order.lines.len(), "checkout started");
        Ok(Some(url))
    }

    /// Archives the purchased originals and notifies the customer.
    pub async fn fulfill(&self, session: &Session, checkout_id: Option<&str>) -> Result<Fulfillment> {
        let email = match checkout_id {
            Some(id) => match self.gateway.customer_email(id).await {
                Ok(email) => email,
                Err(e) => {
                    warn!(error = %e, "payment lookup failed, continuing without email");
                    None
                }
            },
            None => None,
        };

        let mut cart = Cart::load(session).await?;
        if cart.is_empty() {
            return Ok(Fulfillment::EmptyCart);
        }
        let photos = self.gallery.photos_by_ids(&cart.ids()).await?;
        if photos.is_empty() {
            return Ok(Fulfillment::NothingResolvable);
        }

        let mut purchased: Vec<_> = photos.into_values().collect();
        purchased.sort_by_key(|p| p.id);
        let storage = self.gallery.storage();
        let sources: Vec<_> = purchased
            .iter()
            .filter_map(|p| storage.resolve(&p.image))
            .collect();

        let session_key = session
            .id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let relative = archive_relative(&session_key);
        let Some(dest) = storage.resolve(&relative) else {
            return Err(GalleryError::ArchiveWriteFailure("bad archive path".into()));
        };

        let archived = run_blocking(move || build_archive(&dest, &sources)).await;
        let archived = match archived {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "order archive failed");
                return Err(match e {
                    GalleryError::ArchiveWriteFailure(_) => e,
                    other => GalleryError::ArchiveWriteFailure(other.to_string()),
                });
            }
        };
        info!(photos = purchased.len(), archived, "order archive written");

        cart.clear();
        cart.save(session).await?;

        let mut email_error = false;
        if let Some(to) = email.as_deref() {
            let link = self.config.media_link(&relative);
            let notification = Notification::archive_ready(&self.config.mail_from, to, &link);
            if let Err(e) = self.mailer.send(&notification).await {
                warn!(error = %e, "notification delivery failed");
                email_error = true;
            }
        }

        Ok(Fulfillment::Delivered(FulfillmentOutcome {
            zip_url: format!("{}{relative}", self.config.media_url),
            count: purchased.len(),
            email,
            email_error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::SeaOrmStore;
    use crate::token::PathTokenCodec;
    use crate::watermark::{Compositor, DerivedImageCache, WatermarkPolicy};
    use crate::storage::MediaStorage;
    use async_trait::async_trait;
    use sea_orm::prelude::Decimal;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeGateway {
        email: Option<String>,
        fail_lookup: bool,
        orders: Mutex<Vec<CheckoutOrder>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_checkout(&self, order: &CheckoutOrder) -> Result<String> {
            self.orders.lock().unwrap().push(order.clone());
            Ok("https://pay.example/c/1".into())
        }

        async fn customer_email(&self, _checkout_id: &str) -> Result<Option<String>> {
            if self.fail_lookup {
                return Err(GalleryError::PaymentLookupFailure("down".into()));
            }
            Ok(self.email.clone())
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        fail: bool,
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, notification: &Notification) -> Result<()> {
            if self.fail {
                return Err(GalleryError::NotificationDeliveryFailure("smtp down".into()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        root: std::path::PathBuf,
        gallery: GalleryService,
        gateway: Arc<FakeGateway>,
        mailer: Arc<FakeMailer>,
        pipeline: FulfillmentPipeline,
        session: Session,
    }

    async fn fixture(gateway: FakeGateway, mailer: FakeMailer) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("media");
        let db = crate::test_db().await;
        let storage = MediaStorage::new(&root);
        let cache = DerivedImageCache::new(
            storage.clone(),
            Compositor::new(tmp.path().join("logo.png"), WatermarkPolicy::default()),
        );
        let gallery = GalleryService::new(
            db.clone(),
            storage,
            Arc::new(PathTokenCodec::new("s")),
            cache,
        );
        let mut config = Config::new("sqlite::memory:", "s");
        config.media_root = root.clone();
        config.public_base_url = "https://photos.example".into();

        let gateway = Arc::new(gateway);
        let mailer = Arc::new(mailer);
        let pipeline = FulfillmentPipeline::new(
            gallery.clone(),
            gateway.clone(),
            mailer.clone(),
            Arc::new(config),
        );
        let session = Session::new(None, Arc::new(SeaOrmStore::new(db)), None);
        Fixture {
            _tmp: tmp,
            root,
            gallery,
            gateway,
            mailer,
            pipeline,
            session,
        }
    }

    async fn add_photo(f: &Fixture, name: &str, price: Decimal, qty: u32) -> i32 {
        let g = match f.gallery.login("pw").await.unwrap() {
            Some(token) => f.gallery.gallery_by_access_token(&token).await.unwrap(),
            None => f.gallery.create_gallery("Smith", "pw").await.unwrap(),
        };
        let p = f
            .gallery
            .create_photo(g.id, name, name.as_bytes().to_vec(), price)
            .await
            .unwrap();
        let mut cart = Cart::load(&f.session).await.unwrap();
        cart.add(p.id, p.price(), qty, Default::default());
        cart.save(&f.session).await.unwrap();
        p.id
    }

    #[tokio::test]
    async fn checkout_lines_use_minor_units_and_quantities() {
        let f = fixture(FakeGateway::default(), FakeMailer::default()).await;
        add_photo(&f, "a.jpg", Decimal::new(1000, 2), 2).await;
        add_photo(&f, "b.jpg", Decimal::new(550, 2), 1).await;

        let url = f.pipeline.start_checkout(&f.session).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://pay.example/c/1"));

        let orders = f.gateway.orders.lock().unwrap();
        let order = &orders[0];
        assert_eq!(order.currency, "pln");
        assert_eq!(
            order.lines.iter().map(|l| (l.unit_amount, l.quantity)).collect::<Vec<_>>(),
            vec![(1000, 2), (550, 1)]
        );
        assert_eq!(
            order.success_url,
            "https://photos.example/checkout/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(order.cancel_url, "https://photos.example/");
    }

    #[tokio::test]
    async fn empty_cart_does_not_reach_gateway() {
        let f = fixture(FakeGateway::default(), FakeMailer::default()).await;
        assert_eq!(f.pipeline.start_checkout(&f.session).await.unwrap(), None);
        assert!(f.gateway.orders.lock().unwrap().is_empty());
        assert_eq!(
            f.pipeline.fulfill(&f.session, Some("cs")).await.unwrap(),
            Fulfillment::EmptyCart
        );
    }

    #[tokio::test]
    async fn fulfill_archives_notifies_and_clears() {
        let gateway = FakeGateway {
            email: Some("client@example.com".into()),
            ..Default::default()
        };
        let f = fixture(gateway, FakeMailer::default()).await;
        add_photo(&f, "a.jpg", Decimal::new(1000, 2), 1).await;
        add_photo(&f, "b.jpg", Decimal::new(500, 2), 1).await;

        let Fulfillment::Delivered(outcome) =
            f.pipeline.fulfill(&f.session, Some("cs_1")).await.unwrap()
        else {
            panic!("expected delivery");
        };
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.email.as_deref(), Some("client@example.com"));
        assert!(!outcome.email_error);
        assert!(outcome.zip_url.starts_with("/media/zips/order_"));

        let zip_rel = outcome.zip_url.trim_start_matches("/media/");
        assert!(f.root.join(zip_rel).is_file());

        let sent = f.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .body
            .contains(&format!("https://photos.example/media/{zip_rel}")));

        assert!(Cart::load(&f.session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notification_failure_is_reported_not_fatal() {
        let gateway = FakeGateway {
            email: Some("client@example.com".into()),
            ..Default::default()
        };
        let mailer = FakeMailer {
            fail: true,
            ..Default::default()
        };
        let f = fixture(gateway, mailer).await;
        add_photo(&f, "a.jpg", Decimal::new(1000, 2), 1).await;

        let Fulfillment::Delivered(outcome) =
            f.pipeline.fulfill(&f.session, Some("cs_1")).await.unwrap()
        else {
            panic!("expected delivery");
        };
        assert!(outcome.email_error);
        assert!(Cart::load(&f.session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn payment_lookup_failure_means_no_email() {
        let gateway = FakeGateway {
            email: Some("client@example.com".into()),
            fail_lookup: true,
            ..Default::default()
        };
        let f = fixture(gateway, FakeMailer::default()).await;
        add_photo(&f, "a.jpg", Decimal::new(1000, 2), 1).await;

        let Fulfillment::Delivered(outcome) =
            f.pipeline.fulfill(&f.session, Some("cs_1")).await.unwrap()
        else {
            panic!("expected delivery");
        };
        assert_eq!(outcome.email, None);
        assert!(!outcome.email_error);
        assert!(f.mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_photos_only_redirect_home() {
        let f = fixture(FakeGateway::default(), FakeMailer::default()).await;
        let id = add_photo(&f, "a.jpg", Decimal::new(1000, 2), 1).await;
        f.gallery.delete_photo(id).await.unwrap();

        assert_eq!(
            f.pipeline.fulfill(&f.session, None).await.unwrap(),
            Fulfillment::NothingResolvable
        );
        assert!(!Cart::load(&f.session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_failure_keeps_the_cart() {
        let f = fixture(FakeGateway::default(), FakeMailer::default()).await;
        add_photo(&f, "a.jpg", Decimal::new(1000, 2), 1).await;
        std::fs::write(f.root.join("zips"), b"blocks the directory").unwrap();

        assert!(matches!(
            f.pipeline.fulfill(&f.session, None).await,
            Err(GalleryError::ArchiveWriteFailure(_))
        ));
        assert!(!Cart::load(&f.session).await.unwrap().is_empty());
    }
}
