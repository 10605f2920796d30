//! Timestamped backup copies
//!
//! The copy is written to a temp file, synced, then linked into place under
//! a name that did not exist a moment before. A partial copy is never
//! visible under the backup name and an existing backup is never replaced.

use crate::atomic::{keep_permissions, parent_dir_or_dot, sync_dir};
use crate::error::{GuardError, GuardResult};
use chrono::Local;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Collision suffixes tried before giving up
const MAX_ATTEMPTS: u32 = 1000;

/// `<dir>/<stem>_backup_<YYYYmmdd_HHMMSS>[_<attempt>]<.ext>`
pub fn backup_path_for(path: &Path, dir: &Path, timestamp: &str, attempt: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let name = if attempt == 0 {
        format!("{}_backup_{}{}", stem, timestamp, suffix)
    } else {
        format!("{}_backup_{}_{}{}", stem, timestamp, attempt, suffix)
    };
    dir.join(name)
}

/// Back `path` up next to itself. See [`create_backup_in`].
pub fn create_backup(path: &Path) -> GuardResult<PathBuf> {
    create_backup_in(path, None)
}

/// Copy `path` into `dir` (default: the file's own directory).
///
/// Returns the backup location. Nothing is written to `path`.
pub fn create_backup_in(path: &Path, dir: Option<&Path>) -> GuardResult<PathBuf> {
    let failed = |message: String| GuardError::BackupFailed {
        path: path.to_path_buf(),
        message,
    };

    if !path.is_file() {
        return Err(failed("source file does not exist".to_string()));
    }
    let dir = dir.unwrap_or_else(|| parent_dir_or_dot(path));

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| failed(format!("cannot write to {}: {}", dir.display(), e)))?;
    copy_into(path, &mut tmp).map_err(|e| failed(format!("copy failed: {}", e)))?;
    keep_permissions(tmp.path(), path);

    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    for attempt in 0..MAX_ATTEMPTS {
        let candidate = backup_path_for(path, dir, &timestamp, attempt);
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => {
                sync_dir(dir);
                tracing::info!(source = %path.display(), backup = %candidate.display(), "backup created");
                return Ok(candidate);
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(failed(format!("rename failed: {}", e.error))),
        }
    }
    Err(failed(format!(
        "no free backup name after {} attempts",
        MAX_ATTEMPTS
    )))
}

fn copy_into(source: &Path, tmp: &mut NamedTempFile) -> io::Result<()> {
    let mut input = File::open(source)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()
}
