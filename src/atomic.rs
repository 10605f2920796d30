//! Atomic file replacement
//!
//! Content is written to a temp file in the destination's directory, synced,
//! then renamed over the destination. If writing fails the destination is
//! left as it was.

use crate::error::{GuardError, GuardResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Directory holding `path`; `.` for bare file names
pub fn parent_dir_or_dot(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Replace `dest` with whatever `write` puts into the temp file
pub fn write_atomic<T>(
    dest: &Path,
    write: impl FnOnce(&mut File) -> GuardResult<T>,
) -> GuardResult<T> {
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    let out = write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    keep_permissions(tmp.path(), dest);
    tmp.persist(dest).map_err(|e| GuardError::Io(e.error))?;
    sync_dir(dir);
    Ok(out)
}

/// Like [`write_atomic`] for writers that only accept a path.
///
/// The temp file already exists when `write` runs; it must truncate it.
pub fn write_atomic_with_path<T>(
    dest: &Path,
    write: impl FnOnce(&Path) -> GuardResult<T>,
) -> GuardResult<T> {
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?.into_temp_path();
    let out = write(&tmp)?;
    File::open(&tmp)?.sync_all()?;

    keep_permissions(&tmp, dest);
    tmp.persist(dest).map_err(|e| GuardError::Io(e.error))?;
    sync_dir(dir);
    Ok(out)
}

/// Temp files are created owner-only; a replaced file keeps its old mode
pub(crate) fn keep_permissions(tmp: &Path, original: &Path) {
    if let Ok(metadata) = fs::metadata(original) {
        if let Err(e) = fs::set_permissions(tmp, metadata.permissions()) {
            tracing::debug!(path = %original.display(), error = %e, "could not copy permissions");
        }
    }
}

/// Best effort: the rename is already done when this runs
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory sync failed");
    }
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) {}
