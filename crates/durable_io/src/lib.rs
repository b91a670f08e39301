//! Durable file primitives.
//!
//! The core operation is `atomic_write`: stage into a sibling temp file,
//! sync it, rename over the target, then sync the parent directory so the
//! rename itself survives power loss. After any return, a reader sees either
//! the old content or the new content at the target, never a mix, assuming
//! a same-filesystem rename and a correctly implemented filesystem.
//!
//! Directory sync is best-effort: platforms that cannot sync a directory
//! keep the write but lose the rename-durability guarantee, and the failure
//! is logged rather than reported.

#![deny(unsafe_code)]

use seal_core::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Suffix of the staging file `atomic_write` renames into place.
///
/// Reserved alongside the store's `.tmp` family; enumeration never reports
/// either.
pub const ATOMIC_TMP_SUFFIX: &str = "._atomicwrite_tmp";

fn staging_path(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_os_string();
    os.push(ATOMIC_TMP_SUFFIX);
    PathBuf::from(os)
}

/// Durably replace the content of `path` with `bytes`.
///
/// The parent directory is created if missing. On failure the staging file
/// is unlinked best-effort and the target keeps its previous content.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        ensure_dir(parent)?;
    }

    let staging = staging_path(path);
    let staged = write_synced(&staging, bytes)
        .and_then(|()| fs::rename(&staging, path).map_err(|e| Error::file_rename(&staging, path, e)));
    if let Err(e) = staged {
        match fs::remove_file(&staging) {
            Ok(()) => {}
            Err(cleanup) if cleanup.kind() == io::ErrorKind::NotFound => {}
            Err(cleanup) => {
                warn!(staging = %staging.display(), error = %cleanup, "failed to clean staging file");
            }
        }
        return Err(e);
    }

    if let Some(parent) = parent {
        // Rename durability; the data itself is already synced.
        if let Err(e) = sync_dir(parent) {
            warn!(dir = %parent.display(), error = %e, "parent directory sync failed");
        }
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    let mut file = opts.open(path).map_err(|e| Error::file_open(path, e))?;
    file.write_all(bytes).map_err(|e| Error::file_write(path, e))?;
    file.sync_all().map_err(|e| Error::file_write(path, e))?;
    Ok(())
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Read the full content of `path`. An empty file yields an empty vec.
pub fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| Error::file_open(path, e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|e| Error::file_read(path, e))?;
    Ok(buf)
}

/// Unlink `path`. Absence is success.
pub fn delete(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::file_remove(path, e)),
    }
}

/// Whether `path` resolves to an existing entry.
pub fn exists(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

/// Names (not paths) of the regular files directly inside `dir`, in no
/// guaranteed order. Directories, symlinks and special files are skipped.
pub fn list_regular(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::file_open(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::file_read(dir, e))?;
        let file_type = entry.file_type().map_err(|e| Error::file_read(dir, e))?;
        if !file_type.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => warn!(name = ?raw, "skipping non-utf8 directory entry"),
        }
    }
    Ok(names)
}

/// Recursively create `path` as a directory (mode 0755 on fresh components).
///
/// A component that exists as a non-directory fails with `OperationFailed`.
pub fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(Error::OperationFailed(format!(
                "{} exists and is not a directory",
                path.display()
            )))
        }
        Err(_) => {}
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path).map_err(|e| {
        let non_dir_component = path
            .ancestors()
            .any(|a| fs::metadata(a).map(|m| !m.is_dir()).unwrap_or(false));
        if non_dir_component {
            Error::OperationFailed(format!(
                "{}: a path component exists and is not a directory",
                path.display()
            ))
        } else if e.kind() == io::ErrorKind::PermissionDenied {
            Error::AccessDenied(path.to_path_buf())
        } else {
            Error::OperationFailed(format!("create {}: {e}", path.display()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_name_appends_suffix() {
        let p = staging_path(Path::new("/root/cfg.enc.tmp"));
        assert_eq!(p, Path::new("/root/cfg.enc.tmp._atomicwrite_tmp"));
    }
}
