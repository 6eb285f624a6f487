//! Module file copy and marker persistence on the host filesystem

use crate::errors::{InstallerError, Result};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Regular files directly under `dir`, sorted by file name
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Copy every regular file in `src` into `dst`, creating `dst` if needed.
///
/// Stops at the first failure. Files already copied stay in place.
pub fn copy_dir_files(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dst).map_err(|e| InstallerError::Copy {
        path: dst.display().to_string(),
        source: e,
    })?;

    let mut copied = Vec::new();
    for file in list_files(src)? {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = dst.join(name);
        let bytes = fs::copy(&file, &target).map_err(|e| InstallerError::Copy {
            path: file.display().to_string(),
            source: e,
        })?;
        debug!(
            "Copied {} -> {} ({} bytes)",
            file.display(),
            target.display(),
            bytes
        );
        copied.push(target);
    }
    Ok(copied)
}

/// Write `contents` to `path` unless a file is already there.
///
/// Returns `true` when the file was created.
pub fn ensure_file(path: &Path, contents: &str) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(InstallerError::Persistence(format!(
                "cannot stat {}: {}",
                path.display(),
                e
            )))
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            InstallerError::Persistence(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    fs::write(path, contents).map_err(|e| {
        InstallerError::Persistence(format!("cannot write {}: {}", path.display(), e))
    })?;
    Ok(true)
}
