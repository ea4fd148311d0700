//! The integration manager: the single writer of the app list.
//!
//! A named cross-process mutex makes sure only one manager mutates the
//! desktop state at a time; within the process the manager is `&mut self`
//! all the way down. Every successful operation ends in [`finish`], which
//! atomically persists the list, so on-disk state always reflects a
//! completed operation.
//!
//! [`finish`]: IntegrationManager::finish

use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8PathBuf;
use named_lock::NamedLock;
use zeroinstall_schema::{AccessPoint, AppEntry, AppList, FeedTarget};

use crate::conflict::check_for_conflicts;
use crate::errors::{DesktopError, DesktopResult};
use crate::icons::IconStore;
use crate::persistence::AppListFile;
use crate::platform::PlatformIntegration;

/// Base name of the cross-process mutex; suffixed per user or machine.
const MUTEX_BASE: &str = "zeroinstall-desktop-integration";

/// Construction parameters for [`IntegrationManager`].
#[derive(Debug)]
pub struct IntegrationConfig {
    /// Where the app list lives; defaults via [`AppListFile::default_path`]
    pub app_list_path: Utf8PathBuf,
    /// Whether mutations target all users of this machine
    pub machine_wide: bool,
    /// Override the mutex name (tests isolate themselves this way)
    pub mutex_name: Option<String>,
}

impl IntegrationConfig {
    /// Config for the default app-list location.
    pub fn new(machine_wide: bool) -> DesktopResult<IntegrationConfig> {
        Ok(IntegrationConfig {
            app_list_path: AppListFile::default_path(machine_wide)?,
            machine_wide,
            mutex_name: None,
        })
    }

    fn mutex_name(&self) -> String {
        if let Some(name) = &self.mutex_name {
            return name.clone();
        }
        if self.machine_wide {
            format!("{MUTEX_BASE}-machine")
        } else {
            let user = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "user".to_owned());
            format!("{MUTEX_BASE}-{user}")
        }
    }
}

/// Holds the cross-process mutex for as long as the manager lives.
///
/// The guard borrows the lock object, which must therefore outlive it; the
/// lock is process-lifetime state, so it is intentionally leaked.
struct CrossProcessLock {
    _guard: named_lock::NamedLockGuard<'static>,
}

impl CrossProcessLock {
    fn acquire(name: &str) -> DesktopResult<CrossProcessLock> {
        let lock: &'static NamedLock = Box::leak(Box::new(
            NamedLock::create(name)
                .map_err(|err| DesktopError::invalid(format!("mutex setup failed: {err}")))?,
        ));
        match lock.try_lock() {
            Ok(guard) => Ok(CrossProcessLock { _guard: guard }),
            Err(named_lock::Error::WouldBlock) => Err(DesktopError::AnotherInstanceActive),
            Err(err) => Err(DesktopError::invalid(format!("mutex failed: {err}"))),
        }
    }
}

/// Lifecycle manager for app entries and their access points.
pub struct IntegrationManager {
    list: AppList,
    file: AppListFile,
    machine_wide: bool,
    platform: Box<dyn PlatformIntegration>,
    icons: IconStore,
    _lock: CrossProcessLock,
}

impl IntegrationManager {
    /// Acquire the cross-process mutex and open the app list.
    ///
    /// Fails with [`DesktopError::AnotherInstanceActive`] when another
    /// process holds the mutex, and with
    /// [`DesktopError::PermissionDenied`] when a machine-wide manager is
    /// requested without the rights to write the machine-wide list.
    pub fn new(
        config: IntegrationConfig,
        platform: Box<dyn PlatformIntegration>,
        icons: IconStore,
    ) -> DesktopResult<IntegrationManager> {
        let lock = CrossProcessLock::acquire(&config.mutex_name())?;
        let file = AppListFile::new(config.app_list_path.clone());

        if config.machine_wide {
            ensure_writable_location(&config.app_list_path)?;
        }
        let list = file.load()?;

        tracing::info!(
            "integration manager opened {} ({} apps, machine_wide={})",
            file.path(),
            list.entries.len(),
            config.machine_wide
        );
        Ok(IntegrationManager {
            list,
            file,
            machine_wide: config.machine_wide,
            platform,
            icons,
            _lock: lock,
        })
    }

    /// The current app list.
    pub fn app_list(&self) -> &AppList {
        &self.list
    }

    /// Whether this manager mutates machine-wide state.
    pub fn machine_wide(&self) -> bool {
        self.machine_wide
    }

    /// The icon store access points draw from.
    pub fn icons(&self) -> &IconStore {
        &self.icons
    }

    /// Add an app entry (without integrating it yet).
    pub fn add_app(&mut self, target: &FeedTarget) -> DesktopResult<()> {
        if self.list.contains(&target.uri) {
            return Err(DesktopError::invalid(format!(
                "app {} is already in the list",
                target.uri
            )));
        }
        let mut entry = AppEntry::new(&target.uri, &target.feed.name);
        entry.capability_lists = target.feed.capability_lists.clone();
        entry.timestamp = now_unix();
        self.list.entries.push(entry);
        self.finish()
    }

    /// Remove an app and (best effort) its realised access points.
    ///
    /// Unapply failures are logged and do not keep the entry around; a
    /// half-broken desktop entry the user asked to delete should not be
    /// able to pin itself to the list.
    pub fn remove_app(&mut self, interface_uri: &str) -> DesktopResult<()> {
        let position = self
            .list
            .entries
            .iter()
            .position(|e| e.interface_uri == interface_uri)
            .ok_or_else(|| DesktopError::NotFound {
                what: format!("app {interface_uri}"),
            })?;
        let entry = self.list.entries.remove(position);
        self.unapply_all(&entry);
        tracing::info!("removed app {interface_uri}");
        self.finish()
    }

    /// Refresh an entry from new feed metadata and re-realise its points.
    pub fn update_app(&mut self, target: &FeedTarget) -> DesktopResult<()> {
        let entry = self
            .list
            .get(&target.uri)
            .cloned()
            .ok_or_else(|| DesktopError::NotFound {
                what: format!("app {}", target.uri),
            })?;

        if let Some(points) = &entry.access_points {
            if self.hostname_matches(&entry)? {
                self.apply_points(&entry, &target.feed, &points.entries)?;
            }
        }

        let entry = self
            .list
            .get_mut(&target.uri)
            .expect("entry existed a moment ago");
        entry.name = target.feed.name.clone();
        entry.capability_lists = target.feed.capability_lists.clone();
        entry.timestamp = now_unix();
        self.finish()
    }

    /// Integrate new access points for an app.
    ///
    /// Conflicts are checked first; the points are then realised through
    /// the platform handler (rolling back on failure) and finally recorded
    /// in the list. Entries whose hostname filter doesn't match this
    /// machine are recorded without being realised.
    pub fn add_access_points(
        &mut self,
        target: &FeedTarget,
        points: Vec<AccessPoint>,
    ) -> DesktopResult<()> {
        let entry = self
            .list
            .get(&target.uri)
            .cloned()
            .ok_or_else(|| DesktopError::NotFound {
                what: format!("app {}", target.uri),
            })?;

        check_for_conflicts(&self.list, &points, &entry)?;

        if self.hostname_matches(&entry)? {
            self.apply_points(&entry, &target.feed, &points)?;
        } else {
            tracing::debug!(
                "hostname filter: recording but not realising points for {}",
                entry.interface_uri
            );
        }

        let entry = self
            .list
            .get_mut(&target.uri)
            .expect("entry existed a moment ago");
        let list = entry.access_points.get_or_insert_with(Default::default);
        for point in points {
            if !list.entries.contains(&point) {
                list.entries.push(point);
            }
        }
        entry.timestamp = now_unix();
        self.finish()
    }

    /// Remove some of an app's access points.
    pub fn remove_access_points(
        &mut self,
        interface_uri: &str,
        points: &[AccessPoint],
    ) -> DesktopResult<()> {
        let entry = self
            .list
            .get(interface_uri)
            .cloned()
            .ok_or_else(|| DesktopError::NotFound {
                what: format!("app {interface_uri}"),
            })?;

        if self.hostname_matches(&entry)? {
            for point in points {
                self.platform.unapply(&entry, point, self.machine_wide)?;
            }
        }

        let entry = self
            .list
            .get_mut(interface_uri)
            .expect("entry existed a moment ago");
        if let Some(list) = &mut entry.access_points {
            list.entries.retain(|existing| !points.contains(existing));
        }
        entry.timestamp = now_unix();
        self.finish()
    }

    /// Re-realise everything the list says should exist for an app.
    pub fn repair_app(&mut self, target: &FeedTarget) -> DesktopResult<()> {
        let entry = self
            .list
            .get(&target.uri)
            .cloned()
            .ok_or_else(|| DesktopError::NotFound {
                what: format!("app {}", target.uri),
            })?;
        if let Some(points) = &entry.access_points {
            if self.hostname_matches(&entry)? {
                self.apply_points(&entry, &target.feed, &points.entries)?;
            }
        }
        self.finish()
    }

    /// Realise points in order, rolling back the already-applied ones in
    /// reverse when one fails.
    fn apply_points(
        &self,
        entry: &AppEntry,
        feed: &zeroinstall_schema::Feed,
        points: &[AccessPoint],
    ) -> DesktopResult<()> {
        let mut applied: Vec<&AccessPoint> = Vec::new();
        for point in points {
            match self
                .platform
                .apply(entry, feed, point, &self.icons, self.machine_wide)
            {
                Ok(()) => applied.push(point),
                Err(err) => {
                    tracing::warn!(
                        "applying <{}> for {} failed, rolling back {} points",
                        point.tag(),
                        entry.interface_uri,
                        applied.len()
                    );
                    for undo in applied.iter().rev() {
                        if let Err(undo_err) =
                            self.platform.unapply(entry, undo, self.machine_wide)
                        {
                            tracing::warn!(
                                "rollback of <{}> failed too: {undo_err}",
                                undo.tag()
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Best-effort removal of all realised points of an entry.
    pub(crate) fn unapply_all(&self, entry: &AppEntry) {
        let Some(points) = &entry.access_points else {
            return;
        };
        match self.hostname_matches(entry) {
            Ok(true) => {}
            _ => return,
        }
        for point in &points.entries {
            if let Err(err) = self.platform.unapply(entry, point, self.machine_wide) {
                tracing::warn!(
                    "couldn't unapply <{}> of {}: {err}",
                    point.tag(),
                    entry.interface_uri
                );
            }
        }
    }

    /// Does this entry's hostname filter accept the current machine?
    fn hostname_matches(&self, entry: &AppEntry) -> DesktopResult<bool> {
        let Some(pattern) = &entry.hostname_regex else {
            return Ok(true);
        };
        let regex = regex::Regex::new(pattern).map_err(|err| {
            DesktopError::invalid(format!(
                "bad hostname filter on {}: {err}",
                entry.interface_uri
            ))
        })?;
        let hostname = gethostname::gethostname();
        Ok(regex.is_match(&hostname.to_string_lossy()))
    }

    /// Persist the current state; called at the end of every operation.
    pub(crate) fn finish(&mut self) -> DesktopResult<()> {
        self.file.save(&self.list)?;
        tracing::info!("app list saved to {}", self.file.path());
        Ok(())
    }

    /// Replace the whole list (sync does this) and persist.
    pub(crate) fn replace_list(&mut self, list: AppList) -> DesktopResult<()> {
        self.list = list;
        self.finish()
    }
}

/// Probe that we may write where the (machine-wide) list lives.
fn ensure_writable_location(path: &Utf8PathBuf) -> DesktopResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| DesktopError::invalid(format!("bad app list path: {path}")))?;
    if let Err(err) = std::fs::create_dir_all(parent) {
        return Err(DesktopError::PermissionDenied {
            message: format!("cannot create {parent}: {err}"),
        });
    }
    match tempfile::Builder::new()
        .prefix(".access-probe-")
        .tempfile_in(parent)
    {
        Ok(_probe) => Ok(()),
        Err(err) => Err(DesktopError::PermissionDenied {
            message: format!("machine-wide changes need write access to {parent}: {err}"),
        }),
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
