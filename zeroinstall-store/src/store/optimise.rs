//! Hardlink-based deduplication within one store.

#[cfg(unix)]
use camino::Utf8PathBuf;

use super::ImplementationStore;
use crate::errors::StoreResult;
use crate::task::TaskHandler;

/// Files are interchangeable only when everything the manifest records
/// about them matches; linking files with different mtimes would change
/// one implementation's manifest and break verification.
#[cfg(unix)]
#[derive(Debug, PartialEq, Eq, Hash)]
struct DupKey {
    algorithm: &'static str,
    hash: String,
    size: u64,
    mtime: i64,
    executable: bool,
}

#[cfg(unix)]
pub(super) fn run(
    store: &ImplementationStore,
    handler: &dyn TaskHandler,
) -> StoreResult<u64> {
    use std::collections::hash_map::Entry;
    use std::collections::HashMap;
    use std::fs;

    use crate::manifest::{Manifest, ManifestEntry, ManifestFormat, MANIFEST_FILE};

    let token = handler.cancellation();
    let mut first_seen: HashMap<DupKey, Utf8PathBuf> = HashMap::new();
    let mut saved = 0u64;

    for digest in store.list_all()? {
        token.check()?;
        let Some((id, dir)) = store.locate(&digest) else {
            continue;
        };
        let text = match fs::read_to_string(dir.join(MANIFEST_FILE)) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("skipping {id}: unreadable manifest ({err})");
                continue;
            }
        };
        let (format, _) = ManifestFormat::from_digest_id(&id)?;
        let manifest = match Manifest::parse(&text, format) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!("skipping {id}: malformed manifest ({err})");
                continue;
            }
        };

        let mut subdir = String::new();
        for entry in manifest.entries() {
            token.check()?;
            match entry {
                ManifestEntry::Dir { path } => {
                    subdir = path.trim_start_matches('/').to_owned();
                }
                ManifestEntry::File {
                    executable,
                    hash,
                    mtime,
                    size,
                    name,
                } if *size > 0 => {
                    let file_path = if subdir.is_empty() {
                        dir.join(name)
                    } else {
                        dir.join(&subdir).join(name)
                    };
                    let key = DupKey {
                        algorithm: format.prefix(),
                        hash: hash.clone(),
                        size: *size,
                        mtime: *mtime,
                        executable: *executable,
                    };
                    match first_seen.entry(key) {
                        Entry::Occupied(existing) => {
                            if link_duplicate(existing.get(), &file_path)? {
                                saved += size;
                            }
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(file_path);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    tracing::info!("optimise saved {saved} bytes");
    Ok(saved)
}

/// Replace `dup` with a hardlink to `keep`, atomically (link to a temp name
/// in the same directory, then rename over). Problems are warnings: a file
/// that is busy or unlinkable just stays unshared.
#[cfg(unix)]
fn link_duplicate(
    keep: &camino::Utf8Path,
    dup: &camino::Utf8Path,
) -> StoreResult<bool> {
    use std::fs;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let keep_meta = fs::metadata(keep)?;
    let dup_meta = fs::metadata(dup)?;
    if keep_meta.dev() != dup_meta.dev() {
        tracing::debug!("not linking {dup}: different device than {keep}");
        return Ok(false);
    }
    if keep_meta.ino() == dup_meta.ino() {
        return Ok(false);
    }

    let parent = dup
        .parent()
        .expect("manifest file paths always have a parent");

    // the directory may be write-protected; lift that for the swap
    let original_mode = fs::metadata(parent)?.permissions().mode();
    let mut relaxed = fs::metadata(parent)?.permissions();
    relaxed.set_mode(original_mode | 0o300);
    fs::set_permissions(parent, relaxed)?;

    let temp = parent.join(format!(".optimise-{}", uuid::Uuid::new_v4()));
    let result = fs::hard_link(keep, &temp).and_then(|()| fs::rename(&temp, dup));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }

    let mut restore = fs::metadata(parent)?.permissions();
    restore.set_mode(original_mode);
    if let Err(err) = fs::set_permissions(parent, restore) {
        tracing::warn!("couldn't restore permissions on {parent}: {err}");
    }

    match result {
        Ok(()) => {
            tracing::debug!("linked {dup} to {keep}");
            Ok(true)
        }
        Err(err) => {
            tracing::warn!("couldn't link {dup}: {err}");
            Ok(false)
        }
    }
}

#[cfg(not(unix))]
pub(super) fn run(
    _store: &ImplementationStore,
    _handler: &dyn TaskHandler,
) -> StoreResult<u64> {
    tracing::warn!("optimise requires a POSIX filesystem; nothing deduplicated");
    Ok(0)
}
