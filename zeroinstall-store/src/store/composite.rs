//! An ordered chain of stores behaving as one.

use camino::Utf8PathBuf;
use zeroinstall_schema::ManifestDigest;

use super::{ImplementationStore, StoreKind};
use crate::errors::{StoreError, StoreResult};
use crate::extract::ArchiveSource;
use crate::task::TaskHandler;

/// Several stores probed in priority order: typically the user's own store
/// first, then shared machine-wide and system stores.
#[derive(Debug, Default)]
pub struct CompositeStore {
    stores: Vec<ImplementationStore>,
}

impl CompositeStore {
    /// A composite over `stores`, probed in the given order.
    pub fn new(stores: Vec<ImplementationStore>) -> CompositeStore {
        CompositeStore { stores }
    }

    /// The member stores.
    pub fn stores(&self) -> &[ImplementationStore] {
        &self.stores
    }

    /// Is the digest in any member store?
    pub fn contains(&self, digest: &ManifestDigest) -> bool {
        self.stores.iter().any(|store| store.contains(digest))
    }

    /// Path of the first member holding the digest.
    pub fn path_of(&self, digest: &ManifestDigest) -> Option<Utf8PathBuf> {
        self.stores.iter().find_map(|store| store.path_of(digest))
    }

    /// Union of all members' implementations, de-duplicated.
    pub fn list_all(&self) -> StoreResult<Vec<ManifestDigest>> {
        let mut seen = std::collections::BTreeSet::new();
        let mut digests = Vec::new();
        for store in &self.stores {
            for digest in store.list_all()? {
                if let Some(id) = digest.best() {
                    if seen.insert(id) {
                        digests.push(digest);
                    }
                }
            }
        }
        Ok(digests)
    }

    /// Add extracted archives to the first writable member that takes them.
    ///
    /// A member failing doesn't doom the add: the failure is logged and the
    /// next writable member is tried. `AlreadyInStore` from any member ends
    /// the search immediately since the content is present.
    pub fn add_archives(
        &self,
        sources: &[ArchiveSource],
        expected: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<Utf8PathBuf> {
        self.add_with(expected, |store| {
            store.add_archives(sources, expected, handler)
        })
    }

    /// Copy a directory to the first writable member that takes it.
    pub fn add_directory(
        &self,
        source: &camino::Utf8Path,
        expected: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<Utf8PathBuf> {
        self.add_with(expected, |store| {
            store.add_directory(source, expected, handler)
        })
    }

    fn add_with(
        &self,
        expected: &ManifestDigest,
        mut add: impl FnMut(&ImplementationStore) -> StoreResult<Utf8PathBuf>,
    ) -> StoreResult<Utf8PathBuf> {
        // present anywhere (even a read-only member) means present
        if self.contains(expected) {
            return Err(StoreError::AlreadyInStore {
                digest: expected.to_string(),
            });
        }
        let mut last_error = None;
        for store in &self.stores {
            if store.kind() != StoreKind::ReadWrite {
                continue;
            }
            match add(store) {
                Ok(path) => return Ok(path),
                Err(err @ StoreError::AlreadyInStore { .. }) => return Err(err),
                Err(err) => {
                    tracing::warn!("store {} rejected the add: {err}", store.root());
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| StoreError::invalid("no writable store is configured")))
    }

    /// Remove the digest from whichever member holds it.
    pub fn remove(
        &self,
        digest: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<bool> {
        for store in &self.stores {
            if store.contains(digest) {
                return store.remove(digest, handler);
            }
        }
        Ok(false)
    }

    /// Verify the digest in whichever member holds it.
    pub fn verify(
        &self,
        digest: &ManifestDigest,
        handler: &dyn TaskHandler,
    ) -> StoreResult<()> {
        for store in &self.stores {
            if store.contains(digest) {
                return store.verify(digest, handler);
            }
        }
        Err(StoreError::NotFound {
            digest: digest.to_string(),
        })
    }

    /// Optimise every writable member; returns total bytes saved.
    pub fn optimise(&self, handler: &dyn TaskHandler) -> StoreResult<u64> {
        let mut saved = 0;
        for store in &self.stores {
            if store.kind() == StoreKind::ReadWrite {
                saved += store.optimise(handler)?;
            }
        }
        Ok(saved)
    }
}
