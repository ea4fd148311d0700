//! Loading and atomically saving the app-list file.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use zeroinstall_schema::AppList;

use crate::errors::{DesktopError, DesktopResult};

/// How many times a save is retried on transient I/O errors (antivirus
/// scanners and indexers briefly locking freshly-renamed files, mostly).
const SAVE_ATTEMPTS: u32 = 3;

/// Relative location of the per-user app list below the config dir.
const APP_LIST_REL: &str = "zeroinstall/desktop-integration/app-list.xml";

/// The app-list XML file on disk.
#[derive(Debug, Clone)]
pub struct AppListFile {
    path: Utf8PathBuf,
}

impl AppListFile {
    /// Wrap an explicit path.
    pub fn new(path: impl Into<Utf8PathBuf>) -> AppListFile {
        AppListFile { path: path.into() }
    }

    /// The canonical location for this user or for the whole machine.
    pub fn default_path(machine_wide: bool) -> DesktopResult<Utf8PathBuf> {
        if machine_wide {
            return Ok(machine_config_dir().join(APP_LIST_REL));
        }
        let config = dirs::config_dir()
            .ok_or_else(|| DesktopError::invalid("no config directory on this system"))?;
        let config = Utf8PathBuf::from_path_buf(config)
            .map_err(|_| DesktopError::invalid("config directory path is not UTF-8"))?;
        Ok(config.join(APP_LIST_REL))
    }

    /// Where this file lives.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Load the list; a missing file is an empty list, anything else that
    /// fails is an error.
    pub fn load(&self) -> DesktopResult<AppList> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AppList::default())
            }
            Err(err) => return Err(err.into()),
        };
        Ok(AppList::from_xml(&text)?)
    }

    /// Load the list, treating malformed content like a missing file (with
    /// a log line) instead of failing. Used by read-only consumers that
    /// must keep working with whatever state is there.
    pub fn load_safe(&self) -> AppList {
        match self.load() {
            Ok(list) => list,
            Err(err) => {
                tracing::warn!("ignoring unreadable app list at {}: {err}", self.path);
                AppList::default()
            }
        }
    }

    /// Serialize and atomically replace the file (write a sibling temp
    /// file, then rename over), retrying transient failures.
    pub fn save(&self, list: &AppList) -> DesktopResult<()> {
        let xml = list.to_xml()?;
        let parent = self
            .path
            .parent()
            .ok_or_else(|| DesktopError::invalid(format!("bad app list path: {}", self.path)))?;
        std::fs::create_dir_all(parent)?;

        let mut last_error: Option<std::io::Error> = None;
        for attempt in 1..=SAVE_ATTEMPTS {
            match self.try_save(parent, &xml) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        "saving {} failed (attempt {attempt}/{SAVE_ATTEMPTS}): {err}",
                        self.path
                    );
                    last_error = Some(err);
                    std::thread::sleep(std::time::Duration::from_millis(100 * u64::from(attempt)));
                }
            }
        }
        Err(last_error.expect("loop ran at least once").into())
    }

    fn try_save(&self, parent: &Utf8Path, xml: &str) -> std::io::Result<()> {
        let mut temp = tempfile::Builder::new()
            .prefix(".app-list-")
            .tempfile_in(parent)?;
        temp.write_all(xml.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(unix)]
fn machine_config_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/etc/xdg")
}

#[cfg(not(unix))]
fn machine_config_dir() -> Utf8PathBuf {
    std::env::var("ProgramData")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| Utf8PathBuf::from(r"C:\ProgramData"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroinstall_schema::AppEntry;

    fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = AppListFile::new(utf8(&dir).join("app-list.xml"));
        assert_eq!(file.load().unwrap(), AppList::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = AppListFile::new(utf8(&dir).join("nested/app-list.xml"));
        let mut list = AppList::default();
        list.entries
            .push(AppEntry::new("https://example.com/a.xml", "A"));
        file.save(&list).unwrap();
        assert_eq!(file.load().unwrap(), list);

        // no stray temp files survive a successful save
        let stray: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "app-list.xml")
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn load_safe_swallows_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = utf8(&dir).join("app-list.xml");
        std::fs::write(&path, "<this is not xml").unwrap();
        let file = AppListFile::new(path);
        assert!(file.load().is_err());
        assert_eq!(file.load_safe(), AppList::default());
    }
}
