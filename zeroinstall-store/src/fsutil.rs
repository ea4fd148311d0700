//! Filesystem probes and permission helpers used by the store.

use std::fs;

use camino::Utf8Path;
use filetime::FileTime;

use crate::errors::{StoreError, StoreResult};

/// Arbitrary odd-second timestamp used to detect filesystems that round
/// modification times (manifests need 1-second accuracy).
const PROBE_MTIME: i64 = 1_234_567_891;

/// Verify the filesystem under `dir` stores 1-second timestamps.
pub(crate) fn probe_timestamp_accuracy(dir: &Utf8Path) -> StoreResult<()> {
    let probe = tempfile::Builder::new()
        .prefix(".time-probe-")
        .tempfile_in(dir)?;
    filetime::set_file_mtime(probe.path(), FileTime::from_unix_time(PROBE_MTIME, 0))?;
    let meta = fs::metadata(probe.path())?;
    let read_back = FileTime::from_last_modification_time(&meta).unix_seconds();
    if read_back != PROBE_MTIME {
        return Err(StoreError::InsufficientTimeAccuracy {
            path: dir.to_owned(),
        });
    }
    Ok(())
}

/// Can we create files under `dir`?
pub(crate) fn is_writable(dir: &Utf8Path) -> bool {
    tempfile::Builder::new()
        .prefix(".write-probe-")
        .tempfile_in(dir)
        .is_ok()
}

/// Does the filesystem under `dir` support symlinks and POSIX modes?
#[cfg(unix)]
pub(crate) fn probe_unix_fs(dir: &Utf8Path) -> bool {
    let probe = dir.join(format!(".symlink-probe-{}", uuid::Uuid::new_v4()));
    match std::os::unix::fs::symlink("probe-target", &probe) {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub(crate) fn probe_unix_fs(_dir: &Utf8Path) -> bool {
    false
}

/// Clear write bits below `dir` (and on it), leaving read/execute intact.
pub(crate) fn make_read_only_recursive(dir: &Utf8Path) -> StoreResult<()> {
    set_write_bits(dir, false)
}

/// Restore write bits below `dir` so it can be modified or deleted.
pub(crate) fn make_writable_recursive(dir: &Utf8Path) -> StoreResult<()> {
    set_write_bits(dir, true)
}

#[cfg(unix)]
fn set_write_bits(dir: &Utf8Path, writable: bool) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    for item in walkdir::WalkDir::new(dir).contents_first(!writable) {
        let item = item.map_err(|err| StoreError::invalid(format!("walk failed: {err}")))?;
        if item.path_is_symlink() {
            continue;
        }
        let meta = item
            .metadata()
            .map_err(|err| StoreError::invalid(format!("metadata failed: {err}")))?;
        let mut perms = meta.permissions();
        let mode = perms.mode();
        let new_mode = if writable {
            mode | 0o200 | if meta.is_dir() { 0o100 } else { 0 }
        } else {
            mode & !0o222
        };
        if new_mode != mode {
            perms.set_mode(new_mode);
            fs::set_permissions(item.path(), perms)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_write_bits(dir: &Utf8Path, writable: bool) -> StoreResult<()> {
    for item in walkdir::WalkDir::new(dir) {
        let item = item.map_err(|err| StoreError::invalid(format!("walk failed: {err}")))?;
        let meta = item
            .metadata()
            .map_err(|err| StoreError::invalid(format!("metadata failed: {err}")))?;
        if meta.is_file() {
            let mut perms = meta.permissions();
            perms.set_readonly(!writable);
            fs::set_permissions(item.path(), perms)?;
        }
    }
    Ok(())
}

/// Delete a tree even when parts of it are write-protected.
pub(crate) fn remove_dir_all_robust(dir: &Utf8Path) -> StoreResult<()> {
    if let Err(err) = fs::remove_dir_all(dir) {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Ok(());
        }
        make_writable_recursive(dir)?;
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}
