//! Order archives of purchased originals.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{GalleryError, Result};
use crate::storage::ZIPS_AREA;

/// Media-relative archive path for a client session.
///
/// Derived from a hash of the session key, so the same session always gets
/// the same file while the key itself never appears in a URL.
pub fn archive_relative(session_key: &str) -> String {
    let digest = Sha256::digest(session_key.as_bytes());
    format!("{ZIPS_AREA}/order_{}.zip", hex::encode(&digest[..8]))
}

/// Writes the files in `sources` into a zip at `dest`, each under its base
/// filename.
///
/// Missing files are skipped, as are later files whose base name was
/// already added. The archive is written next to `dest` and renamed into
/// place, so a reader never sees a partial zip. Returns the number of files
/// archived.
///
/// Blocking.
pub fn build_archive(dest: &Path, sources: &[PathBuf]) -> Result<usize> {
    write_archive(dest, sources).map_err(|e| GalleryError::ArchiveWriteFailure(e.to_string()))
}

fn write_archive(dest: &Path, sources: &[PathBuf]) -> io::Result<usize> {
    let dir = dest
        .parent()
        .ok_or_else(|| io::Error::other("archive destination has no parent"))?;
    std::fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut zip = ZipWriter::new(tmp.reopen()?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut names = HashSet::new();
    let mut written = 0;
    for source in sources {
        let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let mut file = match File::open(source) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(file = name, "original missing, left out of archive");
                continue;
            }
            Err(e) => return Err(e),
        };
        if !names.insert(name.to_string()) {
            warn!(file = name, "duplicate file name, left out of archive");
            continue;
        }
        zip.start_file(name, options).map_err(io::Error::other)?;
        io::copy(&mut file, &mut zip)?;
        written += 1;
    }

    let mut inner = zip.finish().map_err(io::Error::other)?;
    inner.flush()?;
    inner.sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(written)
}
