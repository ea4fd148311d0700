//! A builder that writes a real directory tree.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;

use super::{Builder, RelativePath};
use crate::errors::{StoreError, StoreResult};
use crate::manifest::{SYMLINK_FILE, XBIT_FILE};

/// Writes builder operations to a filesystem path.
///
/// On platforms (or filesystems) without POSIX modes and symlinks the
/// executable bit and link targets are carried by `.xbit` / `.symlink`
/// flag files beside the root, which the manifest walk reads back.
pub struct DirectoryBuilder {
    root: Utf8PathBuf,
    flag_files: bool,
    xbit: BTreeSet<String>,
    symlinks: BTreeSet<String>,
    seen_files: HashSet<String>,
    pending_hardlinks: Vec<(RelativePath, RelativePath, bool)>,
    dir_mtimes: Vec<(Utf8PathBuf, i64)>,
}

impl DirectoryBuilder {
    /// A builder writing under `root`, using native metadata where the
    /// platform has it.
    pub fn new(root: impl Into<Utf8PathBuf>) -> DirectoryBuilder {
        Self::with_flag_files(root, !cfg!(unix))
    }

    /// A builder with explicit control over flag-file mode (used by stores
    /// that detected a non-POSIX filesystem at a POSIX OS).
    pub fn with_flag_files(root: impl Into<Utf8PathBuf>, flag_files: bool) -> DirectoryBuilder {
        DirectoryBuilder {
            root: root.into(),
            flag_files,
            xbit: BTreeSet::new(),
            symlinks: BTreeSet::new(),
            seen_files: HashSet::new(),
            pending_hardlinks: Vec::new(),
            dir_mtimes: Vec::new(),
        }
    }

    /// The root everything is written under.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn dest(&self, path: &RelativePath) -> Utf8PathBuf {
        path.join_under(&self.root)
    }

    fn ensure_parent(&self, dest: &Utf8Path) -> StoreResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Remove whatever non-directory entry currently occupies `dest`, so a
    /// later overlay can replace an earlier file or symlink.
    fn clear_slot(&mut self, path: &RelativePath, dest: &Utf8Path) -> StoreResult<()> {
        match fs::symlink_metadata(dest) {
            Ok(meta) if !meta.is_dir() => fs::remove_file(dest)?,
            _ => {}
        }
        self.xbit.remove(path.as_str());
        self.symlinks.remove(path.as_str());
        Ok(())
    }

    fn write_flag_file(&self, name: &str, entries: &BTreeSet<String>) -> StoreResult<()> {
        let path = self.root.join(name);
        if entries.is_empty() {
            return Ok(());
        }
        let mut out = String::new();
        for entry in entries {
            out.push('/');
            out.push_str(entry);
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }
}

impl Builder for DirectoryBuilder {
    fn add_directory(&mut self, path: &RelativePath, mtime: Option<i64>) -> StoreResult<()> {
        let dest = self.dest(path);
        fs::create_dir_all(&dest)?;
        if let Some(mtime) = mtime {
            self.dir_mtimes.push((dest, mtime));
        }
        Ok(())
    }

    fn add_file(
        &mut self,
        path: &RelativePath,
        reader: &mut dyn Read,
        mtime: i64,
        executable: bool,
    ) -> StoreResult<()> {
        let dest = self.dest(path);
        self.ensure_parent(&dest)?;
        self.clear_slot(path, &dest)?;

        let mut file = fs::File::create(&dest)?;
        std::io::copy(reader, &mut file)?;
        file.flush()?;
        drop(file);

        if executable {
            if self.flag_files {
                self.xbit.insert(path.as_str().to_owned());
            } else {
                set_executable(&dest)?;
            }
        }
        filetime::set_file_mtime(&dest, FileTime::from_unix_time(mtime, 0))?;
        self.seen_files.insert(path.as_str().to_owned());
        Ok(())
    }

    fn add_symlink(&mut self, path: &RelativePath, target: &str) -> StoreResult<()> {
        let dest = self.dest(path);
        self.ensure_parent(&dest)?;
        self.clear_slot(path, &dest)?;

        if self.flag_files {
            fs::write(&dest, target.as_bytes())?;
            self.symlinks.insert(path.as_str().to_owned());
        } else {
            make_symlink(target, &dest)?;
        }
        Ok(())
    }

    fn queue_hardlink(
        &mut self,
        path: &RelativePath,
        target: &RelativePath,
        executable: bool,
    ) -> StoreResult<()> {
        self.pending_hardlinks
            .push((path.clone(), target.clone(), executable));
        Ok(())
    }

    fn finish(&mut self) -> StoreResult<()> {
        for (path, target, executable) in std::mem::take(&mut self.pending_hardlinks) {
            if !self.seen_files.contains(target.as_str()) {
                return Err(StoreError::invalid(format!(
                    "hardlink {path} points at {target}, which was never added"
                )));
            }
            let dest = self.dest(&path);
            self.ensure_parent(&dest)?;
            self.clear_slot(&path, &dest)?;
            fs::hard_link(self.dest(&target), &dest)?;
            if self.flag_files && executable {
                self.xbit.insert(path.as_str().to_owned());
            }
            self.seen_files.insert(path.as_str().to_owned());
        }

        if self.flag_files {
            self.write_flag_file(XBIT_FILE, &self.xbit)?;
            self.write_flag_file(SYMLINK_FILE, &self.symlinks)?;
        }

        // deepest-first so parent updates don't clobber child times
        let mut mtimes = std::mem::take(&mut self.dir_mtimes);
        mtimes.sort_by(|a, b| b.0.as_str().len().cmp(&a.0.as_str().len()));
        for (dir, mtime) in mtimes {
            if let Err(err) = filetime::set_file_mtime(&dir, FileTime::from_unix_time(mtime, 0))
            {
                tracing::debug!("couldn't set mtime on {dir}: {err}");
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &Utf8Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Utf8Path) -> StoreResult<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &str, dest: &Utf8Path) -> StoreResult<()> {
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_symlink(target: &str, dest: &Utf8Path) -> StoreResult<()> {
    // native symlinks need privileges on Windows; fall back to a copy of
    // the flag-file scheme even when flag mode wasn't requested
    let _ = (target, dest);
    Err(StoreError::invalid(
        "symlinks are not supported on this platform without flag files",
    ))
}
