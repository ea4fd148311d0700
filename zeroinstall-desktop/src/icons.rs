//! A freshness-gated download cache for application icons.

use std::fs;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use zeroinstall_schema::Icon;

use crate::errors::{DesktopError, DesktopResult};

/// Everything except the characters safe in a cache file name.
const FILE_NAME_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_');

/// Re-download icons older than this by default.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(20 * 60);

/// Filesystem cache of downloaded icons, keyed by source URL.
pub struct IconStore {
    dir: Utf8PathBuf,
    freshness: Duration,
    client: reqwest::blocking::Client,
    // gates concurrent downloads of the same icon from one store
    download_lock: Mutex<()>,
}

impl std::fmt::Debug for IconStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconStore")
            .field("dir", &self.dir)
            .field("freshness", &self.freshness)
            .finish()
    }
}

impl IconStore {
    /// A store under `dir` with the default freshness window.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> DesktopResult<IconStore> {
        Self::with_freshness(dir, DEFAULT_FRESHNESS)
    }

    /// A store with an explicit freshness window (tests use zero).
    pub fn with_freshness(
        dir: impl Into<Utf8PathBuf>,
        freshness: Duration,
    ) -> DesktopResult<IconStore> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(IconStore {
            dir,
            freshness,
            client: reqwest::blocking::Client::new(),
            download_lock: Mutex::new(()),
        })
    }

    /// The directory icons are cached in.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Stable cache file name for an icon URL.
    pub fn cache_file_name(icon: &Icon) -> String {
        let escaped = utf8_percent_encode(icon.href.as_str(), FILE_NAME_ESCAPES).to_string();
        format!("{escaped}{}", extension_for(icon.mime_type.as_deref()))
    }

    /// Path of the cached icon, downloading or refreshing it as needed.
    ///
    /// A cached file younger than the freshness window is returned as is.
    /// When a refresh fails but a stale copy exists, the stale copy is
    /// returned (with a log line) rather than failing the caller.
    pub fn get_path(&self, icon: &Icon) -> DesktopResult<Utf8PathBuf> {
        let path = self.dir.join(Self::cache_file_name(icon));
        if self.is_fresh(&path) {
            return Ok(path);
        }

        let _guard = self
            .download_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // someone else may have refreshed it while we waited
        if self.is_fresh(&path) {
            return Ok(path);
        }

        match self.download(icon, &path) {
            Ok(()) => Ok(path),
            Err(err) if path.exists() => {
                tracing::warn!("keeping stale icon for {}: {err}", icon.href);
                Ok(path)
            }
            Err(err) => Err(err),
        }
    }

    fn is_fresh(&self, path: &Utf8Path) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age < self.freshness)
            .unwrap_or(true) // mtime in the future: treat as fresh
    }

    fn download(&self, icon: &Icon, path: &Utf8Path) -> DesktopResult<()> {
        tracing::info!("fetching icon {}", icon.href);
        if icon.href.scheme() == "file" {
            let source = icon
                .href
                .to_file_path()
                .map_err(|()| DesktopError::invalid(format!("bad file URL: {}", icon.href)))?;
            let bytes = fs::read(source)?;
            return self.store_atomically(path, &bytes);
        }

        let response = self
            .client
            .get(icon.href.clone())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| DesktopError::network(icon.href.as_str(), err))?;
        let bytes = response
            .bytes()
            .map_err(|err| DesktopError::network(icon.href.as_str(), err))?;
        self.store_atomically(path, &bytes)
    }

    fn store_atomically(&self, path: &Utf8Path, bytes: &[u8]) -> DesktopResult<()> {
        let mut temp = tempfile::Builder::new()
            .prefix(".icon-")
            .tempfile_in(&self.dir)?;
        std::io::Write::write_all(&mut temp, bytes)?;
        temp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

fn extension_for(mime_type: Option<&str>) -> &'static str {
    match mime_type {
        Some("image/png") => ".png",
        Some("image/vnd.microsoft.icon") => ".ico",
        Some("image/svg+xml") => ".svg",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn icon(href: &str, mime: Option<&str>) -> Icon {
        Icon {
            href: Url::parse(href).unwrap(),
            mime_type: mime.map(str::to_owned),
        }
    }

    #[test]
    fn cache_names_are_escaped_and_typed() {
        let name = IconStore::cache_file_name(&icon(
            "https://example.com/icons/app.png?v=2",
            Some("image/png"),
        ));
        assert!(name.ends_with(".png"));
        assert!(!name.contains('/'));
        assert!(!name.contains('?'));
        assert!(name.contains("example.com"));
    }

    #[test]
    fn file_urls_are_cached_and_reused() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("app.svg");
        fs::write(&source, "<svg/>").unwrap();
        let href = Url::from_file_path(&source).unwrap();

        let cache_dir = tempfile::tempdir().unwrap();
        let store = IconStore::new(utf8(&cache_dir)).unwrap();
        let icon = Icon {
            href,
            mime_type: Some("image/svg+xml".to_owned()),
        };

        let path = store.get_path(&icon).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<svg/>");

        // fresh: the cached copy is served even after the source vanishes
        fs::remove_file(&source).unwrap();
        assert_eq!(store.get_path(&icon).unwrap(), path);
    }

    #[test]
    fn stale_copy_survives_a_failed_refresh() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("app.png");
        fs::write(&source, "png-bytes").unwrap();
        let href = Url::from_file_path(&source).unwrap();

        let cache_dir = tempfile::tempdir().unwrap();
        // zero freshness: every get is a refresh attempt
        let store =
            IconStore::with_freshness(utf8(&cache_dir), Duration::from_secs(0)).unwrap();
        let icon = Icon {
            href,
            mime_type: Some("image/png".to_owned()),
        };

        let path = store.get_path(&icon).unwrap();
        fs::remove_file(&source).unwrap();
        // refresh fails now, but the stale file is still served
        assert_eq!(store.get_path(&icon).unwrap(), path);
        assert_eq!(fs::read_to_string(path).unwrap(), "png-bytes");
    }
}
