//! Error taxonomy for the gallery, watermark and fulfillment pipeline.

use std::path::PathBuf;

/// Result type for gallery operations.
pub type Result<T> = std::result::Result<T, GalleryError>;

/// Errors raised by the gallery components.
///
/// Image-pipeline and collaborator failures each have their own variant so
/// that callers can decide between degrading (serve a fallback asset, skip
/// the email) and aborting.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GalleryError {
    /// Token was malformed, tampered with, or names a path outside the media
    /// root. Deliberately carries nothing decoded from the token.
    #[error("invalid path token")]
    InvalidToken,

    /// The source image is missing or could not be decoded.
    #[error("source image unreadable: {path:?}: {reason}")]
    SourceImageUnreadable { path: PathBuf, reason: String },

    /// The watermark logo asset is missing or could not be decoded.
    #[error("watermark asset missing: {path:?}")]
    WatermarkAssetMissing { path: PathBuf },

    /// The order archive could not be written.
    #[error("archive write failed: {0}")]
    ArchiveWriteFailure(String),

    /// The customer notification could not be delivered.
    #[error("notification delivery failed: {0}")]
    NotificationDeliveryFailure(String),

    /// A gallery, photo or cart item no longer exists.
    #[error("{kind} not found: {id}")]
    ItemNotFound { kind: &'static str, id: String },

    /// The payment collaborator failed or returned something unusable.
    #[error("payment provider error: {0}")]
    PaymentLookupFailure(String),

    /// Rejected input to an administrative operation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The client session has not passed the gallery password gate.
    #[error("gallery access required")]
    AccessDenied,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl GalleryError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::ItemNotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceImageUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_token_display_leaks_nothing() {
        assert_eq!(GalleryError::InvalidToken.to_string(), "invalid path token");
    }

    #[test]
    fn not_found_names_kind_and_id() {
        let err = GalleryError::not_found("photo", 42);
        assert_eq!(err.to_string(), "photo not found: 42");
    }

    #[test]
    fn io_preserves_source() {
        let err = GalleryError::io("writing archive", std::io::Error::other("disk full"));
        assert!(err.to_string().contains("writing archive"));
        assert!(err.to_string().contains("disk full"));
    }
}
