//! Reversible, authenticated path tokens.
//!
//! A path token is the AES-256-GCM encryption of a media-relative storage
//! path, encoded as URL-safe base64:
//!
//! ```text
//! base64url( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! The key is derived once from the process-wide secret and never changes
//! while the process runs. Starting the process with a different secret
//! invalidates every token issued before, which is acceptable because tokens
//! are minted afresh on each gallery render.
//!
//! Decoding fails closed: anything that is not valid base64, fails
//! authentication, is not UTF-8, or names a path outside the media root is
//! reported as [`GalleryError::InvalidToken`].

use std::fmt;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{GalleryError, Result};
use crate::storage::validate_relative;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encodes media-relative paths into opaque URL tokens and back.
///
/// # Examples
///
/// ```
/// use proof_gallery::token::PathTokenCodec;
///
/// let codec = PathTokenCodec::new("correct horse battery staple");
/// let token = codec.encode("session_photos/smith/originals/01.jpg").unwrap();
/// assert_eq!(
///     codec.decode(&token).unwrap().to_str(),
///     Some("session_photos/smith/originals/01.jpg"),
/// );
/// assert!(codec.decode("not-a-token").is_err());
/// ```
#[derive(Clone)]
pub struct PathTokenCodec {
    cipher: Aes256Gcm,
}

impl fmt::Debug for PathTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathTokenCodec").finish_non_exhaustive()
    }
}

impl PathTokenCodec {
    /// Creates a codec keyed by the SHA-256 digest of `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(secret.as_ref());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts a media-relative path.
    ///
    /// Paths that could not be decoded again (absolute, containing `..`,
    /// empty) are refused with [`GalleryError::InvalidToken`].
    pub fn encode(&self, path: &str) -> Result<String> {
        let normalized = validate_relative(path).ok_or(GalleryError::InvalidToken)?;
        let plaintext = normalized.to_str().ok_or(GalleryError::InvalidToken)?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| GalleryError::InvalidToken)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(nonce.as_slice());
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Decrypts a token back to a validated media-relative path.
    pub fn decode(&self, token: &str) -> Result<PathBuf> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| GalleryError::InvalidToken)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(GalleryError::InvalidToken);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| GalleryError::InvalidToken)?;
        let path = String::from_utf8(plaintext).map_err(|_| GalleryError::InvalidToken)?;

        validate_relative(&path).ok_or(GalleryError::InvalidToken)
    }
}
