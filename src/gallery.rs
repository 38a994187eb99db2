//! Gallery access, preview delivery and photo lifecycle.
//!
//! [`GalleryService`] is the orchestration layer between the HTTP handlers
//! and the leaf components:
//!
//! ```text
//! password ──login──▶ access token ──open──▶ photos + fresh path tokens
//!                                                    │
//!                      /image/{token} ──decode──▶ media path ──cache──▶ JPEG
//! ```
//!
//! It holds no locks. Rendering runs on the blocking thread pool, so a slow
//! composite never stalls the async workers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::prelude::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tower_sessions::Session;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cart::minor_units;
use crate::entity::{gallery, photo};
use crate::error::{GalleryError, Result};
use crate::storage::{remove_if_exists, write_atomic, MediaStorage};
use crate::token::PathTokenCodec;
use crate::watermark::{Derived, DerivedImageCache};

/// Session key set once the client has opened a gallery.
pub const GALLERY_ACCESS_KEY: &str = "gallery_access";

/// Marks the client session as having passed the password gate.
pub async fn grant_access(session: &Session) -> Result<()> {
    session.insert(GALLERY_ACCESS_KEY, true).await?;
    Ok(())
}

/// Whether the client session ever passed the password gate.
pub async fn has_access(session: &Session) -> Result<bool> {
    Ok(session.get::<bool>(GALLERY_ACCESS_KEY).await?.unwrap_or(false))
}

/// A photo as listed to the client, with a freshly minted path token.
#[derive(Clone, Debug)]
pub struct PhotoView {
    pub id: i32,
    pub price: Decimal,
    pub token: String,
}

/// Bytes ready to be sent for an `/image/{token}` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// `false` when the original had to be served instead of a derivative.
    pub watermarked: bool,
}

#[derive(Clone)]
pub struct GalleryService {
    db: DatabaseConnection,
    storage: MediaStorage,
    codec: Arc<PathTokenCodec>,
    cache: DerivedImageCache,
    eager_watermark: bool,
}

impl GalleryService {
    pub fn new(
        db: DatabaseConnection,
        storage: MediaStorage,
        codec: Arc<PathTokenCodec>,
        cache: DerivedImageCache,
    ) -> Self {
        Self {
            db,
            storage,
            codec,
            cache,
            eager_watermark: false,
        }
    }

    /// Render derivatives when photos are created rather than on first view.
    pub fn with_eager_watermark(mut self, eager: bool) -> Self {
        self.eager_watermark = eager;
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn storage(&self) -> &MediaStorage {
        &self.storage
    }

    // ---- client access ----

    /// Exchanges a password for a freshly rotated gallery access token.
    ///
    /// The lookup and the token update share one transaction, so once this
    /// returns every previously issued gallery URL is dead. Returns `None`
    /// when no gallery has this password.
    pub async fn login(&self, password: &str) -> Result<Option<String>> {
        let txn = self.db.begin().await?;

        let Some(found) = gallery::Entity::find()
            .filter(gallery::Column::Password.eq(password))
            .order_by_asc(gallery::Column::Id)
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        let gallery_id = found.id;
        let token = new_access_token();
        let mut active = found.into_active_model();
        active.access_token = Set(token.clone());
        active.update(&txn).await?;
        txn.commit().await?;

        info!(gallery_id, "gallery access token rotated");
        Ok(Some(token))
    }

    pub async fn gallery_by_access_token(&self, access_token: &str) -> Result<gallery::Model> {
        gallery::Entity::find()
            .filter(gallery::Column::AccessToken.eq(access_token))
            .one(&self.db)
            .await?
            .ok_or_else(|| GalleryError::not_found("gallery", "access token"))
    }

    /// Lists a gallery's photos, each with a newly encoded path token.
    ///
    /// Tokens are never reused between renders. A photo whose stored path
    /// cannot be encoded is left out and logged.
    pub async fn list_photos(&self, gallery: &gallery::Model) -> Result<Vec<PhotoView>> {
        let photos = gallery
            .find_related(photo::Entity)
            .order_by_asc(photo::Column::Id)
            .all(&self.db)
            .await?;

        Ok(photos
            .into_iter()
            .filter_map(|p| match self.codec.encode(&p.image) {
                Ok(token) => Some(PhotoView {
                    id: p.id,
                    price: p.price(),
                    token,
                }),
                Err(_) => {
                    warn!(photo_id = p.id, "stored photo path rejected by token codec");
                    None
                }
            })
            .collect())
    }

    pub fn mint_token(&self, photo: &photo::Model) -> Result<String> {
        self.codec.encode(&photo.image)
    }

    pub async fn photo(&self, id: i32) -> Result<photo::Model> {
        photo::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| GalleryError::not_found("photo", id))
    }

    /// Existing photos among `ids`, keyed by id.
    pub async fn photos_by_ids(&self, ids: &[i32]) -> Result<HashMap<i32, photo::Model>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let photos = photo::Entity::find()
            .filter(photo::Column::Id.is_in(ids.iter().copied()))
            .all(&self.db)
            .await?;
        Ok(photos.into_iter().map(|p| (p.id, p)).collect())
    }

    // ---- delivery ----

    /// Resolves a path token to the best available preview.
    ///
    /// Order of preference: watermarked derivative, then the original bytes
    /// when rendering fails, then not-found. An invalid token fails with
    /// [`GalleryError::InvalidToken`] before any file is touched.
    pub async fn preview(&self, token: &str) -> Result<Preview> {
        let relative = self.codec.decode(token)?;
        let relative = relative.to_str().ok_or(GalleryError::InvalidToken)?.to_string();
        let original = self
            .storage
            .resolve(&relative)
            .ok_or(GalleryError::InvalidToken)?;

        if !tokio::fs::metadata(&original)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Err(GalleryError::not_found("image", "token"));
        }

        let cache = self.cache.clone();
        let rel = relative.clone();
        let rendered = run_blocking(move || cache.get_or_create(&rel)).await;

        let derived = match rendered {
            Ok(Derived::Stored(path)) => tokio::fs::read(&path)
                .await
                .map(|bytes| (bytes, true))
                .map_err(|e| GalleryError::io(format!("reading {}", path.display()), e)),
            // Logo unavailable: a re-encoded but unmarked preview.
            Ok(Derived::Unstored(bytes)) => Ok((bytes, false)),
            Err(e) => Err(e),
        };

        match derived {
            Ok((bytes, watermarked)) => Ok(Preview {
                bytes,
                content_type: "image/jpeg".to_string(),
                watermarked,
            }),
            Err(err) => {
                warn!(error = %err, "watermark render failed, falling back to original");
                let bytes = tokio::fs::read(&original)
                    .await
                    .map_err(|_| GalleryError::not_found("image", "token"))?;
                Ok(Preview {
                    bytes,
                    content_type: content_type_of(&original),
                    watermarked: false,
                })
            }
        }
    }

    // ---- lifecycle ----

    pub async fn create_gallery(&self, name: &str, password: &str) -> Result<gallery::Model> {
        if name.trim().is_empty() {
            return Err(GalleryError::InvalidInput("gallery name is empty".into()));
        }
        let model = gallery::ActiveModel {
            name: Set(name.to_string()),
            password: Set(password.to_string()),
            access_token: Set(new_access_token()),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        info!(gallery_id = model.id, "gallery created");
        Ok(model)
    }

    /// Stores an uploaded original and creates its photo record.
    ///
    /// With eager watermarking the derivative is rendered right away and its
    /// location recorded; a failed eager render leaves the photo to be
    /// rendered lazily.
    pub async fn create_photo(
        &self,
        gallery_id: i32,
        filename: &str,
        bytes: Vec<u8>,
        price: Decimal,
    ) -> Result<photo::Model> {
        let price_cents = price_to_cents(price)?;
        let owner = gallery::Entity::find_by_id(gallery_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| GalleryError::not_found("gallery", gallery_id))?;

        let relative = self.unique_original_path(&owner.name, filename).await?;
        let dest = self
            .storage
            .resolve(&relative)
            .ok_or_else(|| GalleryError::InvalidInput(format!("unusable filename {filename:?}")))?;
        run_blocking(move || write_atomic(&dest, &bytes)).await?;

        let mut model = photo::ActiveModel {
            gallery_id: Set(gallery_id),
            image: Set(relative),
            watermarked_image: Set(None),
            price_cents: Set(price_cents),
            uploaded_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        info!(photo_id = model.id, gallery_id, "photo created");

        if self.eager_watermark {
            model = self.render_eagerly(model).await?;
        }
        Ok(model)
    }

    /// Replaces the original of a photo and drops every derivative of the
    /// previous content.
    pub async fn replace_original(&self, photo_id: i32, bytes: Vec<u8>) -> Result<photo::Model> {
        let existing = self.photo(photo_id).await?;
        let dest = self
            .storage
            .resolve(&existing.image)
            .ok_or_else(|| GalleryError::InvalidInput("stored path escapes media root".into()))?;
        run_blocking(move || write_atomic(&dest, &bytes)).await?;

        self.cache.invalidate(&existing.image)?;
        if let Some(stale) = existing
            .watermarked_image
            .as_deref()
            .and_then(|p| self.storage.resolve(p))
        {
            remove_if_exists(&stale)?;
        }

        let mut active = existing.into_active_model();
        active.watermarked_image = Set(None);
        let mut model = active.update(&self.db).await?;
        info!(photo_id, "photo original replaced");

        if self.eager_watermark {
            model = self.render_eagerly(model).await?;
        }
        Ok(model)
    }

    /// Deletes a photo record, then its files.
    pub async fn delete_photo(&self, photo_id: i32) -> Result<()> {
        let existing = self.photo(photo_id).await?;
        existing.clone().delete(&self.db).await?;
        info!(photo_id, "photo deleted");
        self.after_photo_deleted(&existing)
    }

    /// Deletes a gallery with all of its photos and their files.
    pub async fn delete_gallery(&self, gallery_id: i32) -> Result<()> {
        let txn = self.db.begin().await?;
        let owner = gallery::Entity::find_by_id(gallery_id)
            .one(&txn)
            .await?
            .ok_or_else(|| GalleryError::not_found("gallery", gallery_id))?;
        let photos = owner.find_related(photo::Entity).all(&txn).await?;
        photo::Entity::delete_many()
            .filter(photo::Column::GalleryId.eq(gallery_id))
            .exec(&txn)
            .await?;
        owner.delete(&txn).await?;
        txn.commit().await?;
        info!(gallery_id, photos = photos.len(), "gallery deleted");

        for p in &photos {
            self.after_photo_deleted(p)?;
        }
        Ok(())
    }

    /// Post-delete hook: removes every file owned by a deleted photo.
    ///
    /// Idempotent; files that are already gone are skipped.
    pub fn after_photo_deleted(&self, deleted: &photo::Model) -> Result<()> {
        if let Some(original) = self.storage.resolve(&deleted.image) {
            remove_if_exists(&original)?;
        }
        if let Some(derived) = deleted
            .watermarked_image
            .as_deref()
            .and_then(|p| self.storage.resolve(p))
        {
            remove_if_exists(&derived)?;
        }
        self.cache.invalidate(&deleted.image)?;
        Ok(())
    }

    async fn render_eagerly(&self, model: photo::Model) -> Result<photo::Model> {
        let cache = self.cache.clone();
        let source = model.image.clone();
        match run_blocking(move || cache.get_or_create(&source)).await {
            Ok(Derived::Stored(path)) => {
                let Some(derived) = path
                    .strip_prefix(self.storage.root())
                    .ok()
                    .and_then(|p| p.to_str())
                    .map(str::to_string)
                else {
                    warn!(photo_id = model.id, derived = %path.display(), "derivative outside media root");
                    return Ok(model);
                };
                let mut active = model.into_active_model();
                active.watermarked_image = Set(Some(derived));
                Ok(active.update(&self.db).await?)
            }
            Ok(Derived::Unstored(_)) => Ok(model),
            Err(e) => {
                warn!(photo_id = model.id, error = %e, "eager watermark failed, will render lazily");
                Ok(model)
            }
        }
    }

    /// Storage path for a new original that does not clobber an existing file.
    async fn unique_original_path(&self, gallery_name: &str, filename: &str) -> Result<String> {
        let candidate = self.storage.original_path(gallery_name, filename)?;
        let taken = match self.storage.resolve(&candidate) {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(true),
            None => true,
        };
        if !taken {
            return Ok(candidate);
        }

        let path = PathBuf::from(&candidate);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("photo");
        let suffix = Uuid::new_v4().simple().to_string();
        let renamed = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}_{}.{ext}", &suffix[..8]),
            None => format!("{stem}_{}", &suffix[..8]),
        };
        self.storage.original_path(gallery_name, &renamed)
    }
}

fn new_access_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn price_to_cents(price: Decimal) -> Result<i64> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(GalleryError::InvalidInput("price must not be negative".into()));
    }
    if price.round_dp(2) != price {
        return Err(GalleryError::InvalidInput(
            "price must have at most two decimal places".into(),
        ));
    }
    minor_units(price).ok_or_else(|| GalleryError::InvalidInput("price out of range".into()))
}

fn content_type_of(path: &std::path::Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Runs blocking filesystem or image work off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GalleryError::io("blocking task", std::io::Error::other(e)))?
}
