use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::GalleryError;

/// Handler error. Maps the crate taxonomy onto status codes and a generic
/// `{ok: false, error}` body; details go to the log only.
#[derive(Debug)]
pub struct ApiError(pub GalleryError);

impl From<GalleryError> for ApiError {
    fn from(e: GalleryError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GalleryError::InvalidToken
            | GalleryError::ItemNotFound { .. }
            | GalleryError::SourceImageUnreadable { .. } => StatusCode::NOT_FOUND,
            GalleryError::AccessDenied => StatusCode::FORBIDDEN,
            GalleryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GalleryError::PaymentLookupFailure(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::NOT_FOUND => "not found",
            StatusCode::FORBIDDEN => "gallery access required",
            StatusCode::BAD_REQUEST => "invalid request",
            StatusCode::BAD_GATEWAY => "payment provider unavailable",
            _ => "internal error",
        };

        match &self.0 {
            // Never log anything derived from a rejected token.
            GalleryError::InvalidToken => debug!("rejected path token"),
            e if status.is_server_error() && status != StatusCode::BAD_GATEWAY => {
                error!(error = %e, "request failed")
            }
            e => warn!(error = %e, %status, "request rejected"),
        }

        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let status = |e| ApiError(e).status();
        assert_eq!(status(GalleryError::InvalidToken), StatusCode::NOT_FOUND);
        assert_eq!(
            status(GalleryError::not_found("photo", 1)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(GalleryError::unreadable("a.jpg", "truncated")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(GalleryError::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(
            status(GalleryError::PaymentLookupFailure("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(GalleryError::ArchiveWriteFailure("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn body_is_generic() {
        let response =
            ApiError(GalleryError::Config("secret detail".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
