//! Media-root layout and filesystem helpers.
//!
//! Every stored file is addressed by a path relative to the media root.
//! Relative paths are validated before they are joined onto the root, so a
//! stored or decoded path can never escape it.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{GalleryError, Result};

/// Directory holding uploaded originals, grouped per gallery.
pub const ORIGINALS_AREA: &str = "session_photos";
/// Directory holding cached watermark derivatives.
pub const WATERMARKED_AREA: &str = "watermarked";
/// Directory holding order archives.
pub const ZIPS_AREA: &str = "zips";

/// Validates and normalizes a media-relative path.
///
/// Rejects empty paths, absolute paths, and anything containing `..`, a
/// root or a drive prefix. `.` components are dropped.
pub fn validate_relative(path: &str) -> Option<PathBuf> {
    if path.is_empty() || path.contains('\0') {
        return None;
    }

    let path = Path::new(path);
    if path.is_absolute() {
        return None;
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => normalized.push(name),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if normalized.as_os_str().is_empty() {
        return None;
    }
    Some(normalized)
}

/// Storage-path segment for a gallery display name.
pub fn gallery_slug(name: &str) -> String {
    name.replace(' ', "_").to_lowercase()
}

/// The media root plus the layout of the areas below it.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins a validated relative path onto the root.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        validate_relative(relative).map(|p| self.root.join(p))
    }

    /// Relative storage path of an original belonging to a gallery.
    pub fn original_path(&self, gallery_name: &str, filename: &str) -> Result<String> {
        let base = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| GalleryError::InvalidInput(format!("unusable upload filename {filename:?}")))?;
        Ok(format!(
            "{ORIGINALS_AREA}/{}/originals/{base}",
            gallery_slug(gallery_name)
        ))
    }

    pub fn area(&self, area: &str) -> PathBuf {
        self.root.join(area)
    }
}

/// Writes `bytes` to `dest` so that readers only ever see the complete file.
///
/// The data lands in a temporary file in the destination directory and is
/// renamed into place. Concurrent writers to the same destination each
/// rename a complete file; the last rename wins.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| GalleryError::Config(format!("no parent directory for {dest:?}")))?;
    fs::create_dir_all(dir)
        .map_err(|e| GalleryError::io(format!("creating {}", dir.display()), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| GalleryError::io(format!("creating temp file in {}", dir.display()), e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| GalleryError::io(format!("writing {}", dest.display()), e))?;
    tmp.persist(dest)
        .map_err(|e| GalleryError::io(format!("renaming into {}", dest.display()), e.error))?;
    Ok(())
}

/// Removes a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(GalleryError::io(format!("removing {}", path.display()), e)),
    }
}
