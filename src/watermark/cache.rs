use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::compositor::Compositor;
use crate::error::{GalleryError, Result};
use crate::storage::{remove_if_exists, write_atomic, MediaStorage, WATERMARKED_AREA};

/// Where a derived preview came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derived {
    /// A cached derivative on disk, either pre-existing or just written.
    Stored(PathBuf),
    /// An unmarked preview rendered because the logo was unavailable.
    /// It is served but never cached.
    Unstored(Vec<u8>),
}

/// On-disk memoization of watermark derivatives.
///
/// Derivatives live at
/// `watermarked/<policy-version>/<path-key>-<source-stamp>.jpg` below the
/// media root. The path key hashes the media-relative source path; the
/// source stamp hashes the modification time, length and (on Unix) inode of
/// the source file. Replacing an original therefore always lands on a new
/// key, whatever timestamp the replacement carries. Superseded stamps are
/// pruned after each render and [`DerivedImageCache::invalidate`] removes
/// every stamp of a source.
#[derive(Debug, Clone)]
pub struct DerivedImageCache {
    storage: MediaStorage,
    compositor: Compositor,
}

impl DerivedImageCache {
    pub fn new(storage: MediaStorage, compositor: Compositor) -> Self {
        Self {
            storage,
            compositor,
        }
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Media-relative location of the derivative for the current content of
    /// `source`.
    pub fn derived_relative(&self, source: &str) -> Result<String> {
        let source_path = self.resolve(source)?;
        let meta = source_metadata(&source_path)?;
        Ok(self.relative_for(source, &meta))
    }

    /// Absolute location of the derivative for the current content of
    /// `source`.
    pub fn derived_path(&self, source: &str) -> Result<PathBuf> {
        Ok(self.storage.root().join(self.derived_relative(source)?))
    }

    /// Returns the derivative for a media-relative source path, rendering
    /// and storing it first when none exists for the source's current
    /// content.
    ///
    /// Blocking: decodes, composites and encodes on the calling thread.
    pub fn get_or_create(&self, source: &str) -> Result<Derived> {
        let source_path = self.resolve(source)?;
        // Stat before decoding: the bytes rendered are never older than the stamp.
        let meta = source_metadata(&source_path)?;
        let derived = self.storage.root().join(self.relative_for(source, &meta));

        if derived.is_file() {
            debug!(derived = %derived.display(), "watermark cache hit");
            return Ok(Derived::Stored(derived));
        }

        let rendered = self.compositor.render_file(&source_path)?;
        if !rendered.watermarked {
            return Ok(Derived::Unstored(rendered.jpeg));
        }

        write_atomic(&derived, &rendered.jpeg)?;
        info!(derived = %derived.display(), "watermark derivative stored");
        if self.remove_stamps(source, Some(&derived))? {
            debug!(source, "superseded watermark derivatives pruned");
        }
        Ok(Derived::Stored(derived))
    }

    /// Removes every cached derivative of `source` under the current policy.
    pub fn invalidate(&self, source: &str) -> Result<bool> {
        self.remove_stamps(source, None)
    }

    fn resolve(&self, source: &str) -> Result<PathBuf> {
        self.storage.resolve(source).ok_or(GalleryError::InvalidToken)
    }

    fn policy_dir(&self) -> PathBuf {
        self.storage
            .area(WATERMARKED_AREA)
            .join(self.compositor.policy().version())
    }

    fn relative_for(&self, source: &str, meta: &fs::Metadata) -> String {
        format!(
            "{WATERMARKED_AREA}/{}/{}-{}.jpg",
            self.compositor.policy().version(),
            path_key(source),
            source_stamp(meta)
        )
    }

    /// Deletes the derivatives of `source`, sparing `keep`.
    fn remove_stamps(&self, source: &str, keep: Option<&Path>) -> Result<bool> {
        let dir = self.policy_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(GalleryError::io(format!("listing {}", dir.display()), e)),
        };

        let prefix = format!("{}-", path_key(source));
        let mut removed = false;
        for entry in entries {
            let entry = entry.map_err(|e| GalleryError::io(format!("listing {}", dir.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) || !name.ends_with(".jpg") {
                continue;
            }
            let path = entry.path();
            if keep == Some(path.as_path()) {
                continue;
            }
            removed |= remove_if_exists(&path)?;
        }
        Ok(removed)
    }
}

fn source_metadata(path: &Path) -> Result<fs::Metadata> {
    let meta = fs::metadata(path).map_err(|e| GalleryError::unreadable(path, e))?;
    if !meta.is_file() {
        return Err(GalleryError::unreadable(path, "not a regular file"));
    }
    Ok(meta)
}

fn path_key(source: &str) -> String {
    hex::encode(&Sha256::digest(source.as_bytes())[..8])
}

/// Fingerprint of the file content a derivative was rendered from.
fn source_stamp(meta: &fs::Metadata) -> String {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(modified.to_le_bytes());
    hasher.update(meta.len().to_le_bytes());
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        hasher.update(meta.dev().to_le_bytes());
        hasher.update(meta.ino().to_le_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}
