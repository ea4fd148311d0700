//! The content-addressed implementation store.
//!
//! Every implementation lives in a directory named by its manifest digest.
//! New content is staged into a randomly-named sibling, verified against
//! the digest it was promised under, and only then renamed into place; the
//! name is the proof of integrity.

mod composite;
mod optimise;

use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;
use zeroinstall_schema::ManifestDigest;

use crate::builder::{Builder, DirectoryBuilder};
use crate::errors::{StoreError, StoreResult};
use crate::extract::{extract_all, feed_directory, ArchiveSource};
use crate::fsutil;
use crate::manifest::{Manifest, ManifestFormat, MANIFEST_FILE};
use crate::task::TaskHandler;

pub use composite::CompositeStore;

/// Flag file marking a store whose filesystem lacks POSIX metadata.
pub const NO_UNIX_FS_FLAG: &str = ".no-unix-fs";
/// Human-readable note dropped into new stores.
pub const DELETION_INFO_FILE: &str = "deletion-info.txt";

const TEMP_ADD_PREFIX: &str = "0install-add-";
const TEMP_REMOVE_PREFIX: &str = "0install-remove-";

/// Serializes the temp-to-final rename across threads so concurrent adds of
/// the same digest race on the directory check, not on half-moved trees.
static RENAME_LOCK: Mutex<()> = Mutex::new(());

/// Whether a store can accept new implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Implementations can be added and removed
    ReadWrite,
    /// Lookup only (e.g. a system store owned by another user)
    ReadOnly,
}

/// One store rooted at a directory.
#[derive(Debug)]
pub struct ImplementationStore {
    root: Utf8PathBuf,
    kind: StoreKind,
    write_protect: bool,
    unix_fs: bool,
}

impl ImplementationStore {
    /// Open (creating if necessary) a store without write protection.
    pub fn new(root: impl Into<Utf8PathBuf>) -> StoreResult<ImplementationStore> {
        Self::with_options(root, false)
    }

    /// Open (creating if necessary) a store.
    ///
    /// With `write_protect`, added implementations get their write bits
    /// cleared so nothing modifies them behind the digest's back.
    pub fn with_options(
        root: impl Into<Utf8PathBuf>,
        write_protect: bool,
    ) -> StoreResult<ImplementationStore> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }

        let writable = fsutil::is_writable(&root);
        let (kind, unix_fs) = if writable {
            fsutil::probe_timestamp_accuracy(&root)?;
            let unix_fs = fsutil::probe_unix_fs(&root);
            if !unix_fs && !root.join(NO_UNIX_FS_FLAG).exists() {
                fs::write(root.join(NO_UNIX_FS_FLAG), b"")?;
            }
            let info = root.join(DELETION_INFO_FILE);
            if !info.exists() {
                fs::write(
                    info,
                    "This directory is an implementation cache.\n\
                     Each subdirectory is named by the cryptographic digest of its contents\n\
                     and can be safely re-downloaded after deletion. Remove entries through\n\
                     the store API rather than deleting them by hand while programs run.\n",
                )?;
            }
            (StoreKind::ReadWrite, unix_fs)
        } else {
            let unix_fs = cfg!(unix) && !root.join(NO_UNIX_FS_FLAG).exists();
            (StoreKind::ReadOnly, unix_fs)
        };

        tracing::info!("opened implementation store at {root} ({kind:?})");
        Ok(ImplementationStore {
            root,
            kind,
            write_protect,
            unix_fs,
        })
    }

    /// The directory everything lives under.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Whether this store accepts additions.
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Whether the underlying filesystem has POSIX modes and symlinks.
    pub fn is_unix_fs(&self) -> bool {
        self.unix_fs
    }

    /// Find the directory holding `digest`, strongest algorithm first.
    pub(crate) fn locate(&self, digest: &ManifestDigest) -> Option<(String, Utf8PathBuf)> {
        for id in digest.ids() {
            let path = self.root.join(&id);
            if path.is_dir() {
                return Some((id, path));
            }
        }
        None
    }

    /// Is any algorithm value of `digest` present?
    pub fn contains(&self, digest: &ManifestDigest) -> bool {
        self.locate(digest).is_some()
    }

    /// Path of the implementation, if present.
    pub fn path_of(&self, digest: &ManifestDigest) -> Option<Utf8PathBuf> {
        self.locate(digest).map(|(_, path)| path)
    }

    /// All implementations in this store.
    pub fn list_all(&self) -> StoreResult<Vec<ManifestDigest>> {
        let mut digests = Vec::new();
        for item in fs::read_dir(&self.root)? {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if let Ok(digest) = ManifestDigest::from_id(name) {
                    digests.push(digest);
                }
            }
        }
        digests.sort_by_key(|d| d.best());
        Ok(digests)
    }

    /// Leftover directories that don't parse as digests (staging debris).
    pub fn list_all_temp(&self) -> StoreResult<Vec<Utf8PathBuf>> {
        let mut temps = Vec::new();
        for item in fs::read_dir(&self.root)? {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = item.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if ManifestDigest::from_id(&name).is_err() {
                temps.push(self.root.join(name));
            }
        }
        temps.sort();
        Ok(temps)
    }

    fn require_writable(&self) -> StoreResult<()> {
        match self.kind {
            StoreKind::ReadWrite => Ok(()),
            StoreKind::ReadOnly => Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("store at {} is read-only", self.root),
            )
            .into()),
        }
    }

    fn new_staging_dir(&self, prefix: &str) -> StoreResult<StagingDir> {
        let path = self.root.join(format!("{prefix}{}", Uuid::new_v4()));
        StagingDir::create(path)
    }

    /// Copy `source` into the store under `expected`.
    pub fn add_directory(
        &self,
        source: &Utf8Path,
        expected: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<Utf8PathBuf> {
        self.require_writable()?;
        self.reject_existing(expected)?;

        let staging = self.new_staging_dir(TEMP_ADD_PREFIX)?;
        let mut builder =
            DirectoryBuilder::with_flag_files(staging.path().to_owned(), !self.unix_fs);
        feed_directory(&mut builder, source, None, handler.cancellation())?;
        builder.finish()?;
        self.verify_and_add(staging, expected, handler)
    }

    /// Extract `sources` (overlaid in order) into the store under `expected`.
    pub fn add_archives(
        &self,
        sources: &[ArchiveSource],
        expected: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<Utf8PathBuf> {
        self.require_writable()?;
        self.reject_existing(expected)?;

        let staging = self.new_staging_dir(TEMP_ADD_PREFIX)?;
        let mut builder =
            DirectoryBuilder::with_flag_files(staging.path().to_owned(), !self.unix_fs);
        extract_all(sources, &mut builder, handler)?;
        self.verify_and_add(staging, expected, handler)
    }

    fn reject_existing(&self, expected: &ManifestDigest) -> StoreResult<()> {
        match self.locate(expected) {
            Some((id, _)) => Err(StoreError::AlreadyInStore { digest: id }),
            None => Ok(()),
        }
    }

    /// Verify staged contents against `expected` and move them into place.
    fn verify_and_add(
        &self,
        staging: StagingDir,
        expected: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<Utf8PathBuf> {
        let expected_id = expected
            .best()
            .ok_or_else(|| StoreError::invalid("expected digest carries no algorithm"))?;
        let (format, expected_value) = ManifestFormat::from_digest_id(&expected_id)?;

        let manifest = Manifest::generate(staging.path(), format, handler.cancellation())?;
        let manifest = if manifest.digest() == expected_value {
            manifest
        } else {
            // some filesystems round odd mtimes down when copying
            let rounded = manifest.with_rounded_timestamps();
            if rounded.digest() == expected_value {
                tracing::debug!("accepted {expected_id} after timestamp rounding");
                rounded
            } else {
                return Err(StoreError::DigestMismatch {
                    expected: expected_id,
                    actual: manifest.digest_id(),
                    expected_manifest: None,
                    actual_manifest: manifest.serialize(),
                });
            }
        };

        fs::write(staging.path().join(MANIFEST_FILE), manifest.serialize())?;

        let final_path = self.root.join(&expected_id);
        {
            let _rename = RENAME_LOCK
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if final_path.exists() {
                return Err(StoreError::AlreadyInStore {
                    digest: expected_id,
                });
            }
            fs::rename(staging.path(), &final_path)?;
            staging.defuse();
        }

        if self.write_protect {
            if let Err(err) = fsutil::make_read_only_recursive(&final_path) {
                tracing::warn!("couldn't write-protect {final_path}: {err}");
            }
        }
        tracing::info!("added implementation {expected_id}");
        Ok(final_path)
    }

    /// Remove an implementation. Returns `false` when it wasn't present.
    pub fn remove(
        &self,
        digest: &ManifestDigest,
        _handler: &dyn TaskHandler,
    ) -> StoreResult<bool> {
        self.require_writable()?;
        let Some((id, path)) = self.locate(digest) else {
            return Ok(false);
        };

        if let Ok(exe) = std::env::current_exe() {
            if exe.starts_with(path.as_std_path()) {
                return Err(StoreError::invalid(format!(
                    "refusing to remove {id}: it contains the running program"
                )));
            }
        }

        if let Err(err) = fsutil::make_writable_recursive(&path) {
            tracing::warn!("couldn't lift write protection on {path}: {err}");
        }
        let doomed = self
            .root
            .join(format!("{TEMP_REMOVE_PREFIX}{}", Uuid::new_v4()));
        fs::rename(&path, &doomed)?;
        fsutil::remove_dir_all_robust(&doomed)?;
        tracing::info!("removed implementation {id}");
        Ok(true)
    }

    /// Recompute an implementation's manifest and compare it to its name.
    ///
    /// On mismatch the handler is shown both manifests and offered removal
    /// of the broken directory; the mismatch is returned either way.
    pub fn verify(
        &self,
        digest: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<()> {
        let Some((id, path)) = self.locate(digest) else {
            return Err(StoreError::NotFound {
                digest: digest.to_string(),
            });
        };
        let (format, expected_value) = ManifestFormat::from_digest_id(&id)?;
        let manifest = Manifest::generate(&path, format, handler.cancellation())?;
        if manifest.digest() == expected_value
            || manifest.with_rounded_timestamps().digest() == expected_value
        {
            tracing::debug!("verified implementation {id}");
            return Ok(());
        }

        handler.output(
            &format!("implementation {id} is damaged"),
            &manifest.serialize(),
        );
        if handler.ask(
            "The implementation does not match its digest. Remove the damaged copy?",
            false,
        ) {
            self.remove(digest, handler)?;
        }
        Err(StoreError::DigestMismatch {
            expected: id,
            actual: manifest.digest_id(),
            expected_manifest: None,
            actual_manifest: manifest.serialize(),
        })
    }

    /// Hardlink identical files across implementations. Returns bytes saved.
    pub fn optimise(&self, handler: &dyn TaskHandler) -> StoreResult<u64> {
        self.require_writable()?;
        optimise::run(self, handler)
    }

    /// Remove every implementation in this store.
    pub fn purge(&self, handler: &dyn TaskHandler) -> StoreResult<()> {
        for digest in self.list_all()? {
            handler.cancellation().check()?;
            self.remove(&digest, handler)?;
        }
        Ok(())
    }
}

/// A staging directory that deletes itself unless defused, so failed or
/// cancelled adds never leave debris (let alone half-verified content under
/// a digest name).
struct StagingDir {
    path: Utf8PathBuf,
    armed: bool,
}

impl StagingDir {
    fn create(path: Utf8PathBuf) -> StoreResult<StagingDir> {
        fs::create_dir(&path)?;
        Ok(StagingDir { path, armed: true })
    }

    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = fsutil::remove_dir_all_robust(&self.path) {
                tracing::warn!("couldn't clean staging dir {}: {err}", self.path);
            }
        }
    }
}
