//! Synchronizing the app list with a server through three-way merges.
//!
//! The wire format is the encrypted ZIP container from the schema crate.
//! The merge reference is the state of the last successful sync, persisted
//! next to the app list; ETags and `If-Match` catch concurrent uploads from
//! other machines, which are resolved by re-downloading and re-merging.

use std::sync::Mutex;

use camino::Utf8PathBuf;
use url::Url;
use zeroinstall_schema::{transport, AppList};

use crate::errors::{DesktopError, DesktopResult};
use crate::integration::IntegrationManager;
use crate::persistence::AppListFile;

/// How a sync conflict between client and server state is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncResetMode {
    /// Normal three-way merge against the last-sync reference
    #[default]
    Merge,
    /// Discard local state: the server's list replaces ours
    Client,
    /// Discard server state: our list replaces the server's
    Server,
}

/// Result of an upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server accepted the payload
    Stored {
        /// New entity tag, when the server reports one
        etag: Option<String>,
    },
    /// The `If-Match` precondition failed: someone else uploaded first
    PreconditionFailed,
}

/// Transport for the encrypted app-list payload.
pub trait AppListEndpoint {
    /// Fetch the current server payload; `None` means no state yet (404).
    fn download(&self) -> DesktopResult<Option<(Vec<u8>, Option<String>)>>;

    /// Store a new payload, guarded by `if_match` when given.
    fn upload(&self, body: &[u8], if_match: Option<&str>) -> DesktopResult<UploadOutcome>;
}

/// HTTPS endpoint speaking the GET/PUT protocol with basic auth.
pub struct HttpEndpoint {
    client: reqwest::blocking::Client,
    url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl HttpEndpoint {
    /// An endpoint for the given payload URL.
    pub fn new(url: Url, username: Option<String>, password: Option<String>) -> HttpEndpoint {
        HttpEndpoint {
            client: reqwest::blocking::Client::new(),
            url,
            username,
            password,
        }
    }

    fn authed(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }
}

impl AppListEndpoint for HttpEndpoint {
    fn download(&self) -> DesktopResult<Option<(Vec<u8>, Option<String>)>> {
        let response = self
            .authed(self.client.get(self.url.clone()))
            .send()
            .map_err(|err| DesktopError::network(self.url.as_str(), err))?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            reqwest::StatusCode::UNAUTHORIZED => Err(DesktopError::CredentialsInvalid),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                let body = response
                    .bytes()
                    .map_err(|err| DesktopError::network(self.url.as_str(), err))?;
                Ok(Some((body.to_vec(), etag)))
            }
            status => Err(DesktopError::network(
                self.url.as_str(),
                format!("unexpected status {status}"),
            )),
        }
    }

    fn upload(&self, body: &[u8], if_match: Option<&str>) -> DesktopResult<UploadOutcome> {
        let mut request = self.authed(self.client.put(self.url.clone())).body(body.to_vec());
        if let Some(tag) = if_match {
            request = request.header(reqwest::header::IF_MATCH, tag);
        }
        let response = request
            .send()
            .map_err(|err| DesktopError::network(self.url.as_str(), err))?;
        match response.status() {
            reqwest::StatusCode::PRECONDITION_FAILED => Ok(UploadOutcome::PreconditionFailed),
            reqwest::StatusCode::UNAUTHORIZED => Err(DesktopError::CredentialsInvalid),
            status if status.is_success() => Ok(UploadOutcome::Stored {
                etag: response
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned),
            }),
            status => Err(DesktopError::network(
                self.url.as_str(),
                format!("unexpected status {status}"),
            )),
        }
    }
}

/// Endpoint over a local file, for `file://` servers and offline tests.
pub struct FileEndpoint {
    path: Utf8PathBuf,
}

impl FileEndpoint {
    /// An endpoint storing the payload at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> FileEndpoint {
        FileEndpoint { path: path.into() }
    }

    fn current_etag(&self) -> Option<String> {
        let meta = std::fs::metadata(&self.path).ok()?;
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        Some(format!("{}-{}", mtime.unix_seconds(), meta.len()))
    }
}

impl AppListEndpoint for FileEndpoint {
    fn download(&self) -> DesktopResult<Option<(Vec<u8>, Option<String>)>> {
        match std::fs::read(&self.path) {
            Ok(body) => Ok(Some((body, self.current_etag()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn upload(&self, body: &[u8], if_match: Option<&str>) -> DesktopResult<UploadOutcome> {
        if let Some(tag) = if_match {
            if self.current_etag().as_deref() != Some(tag) {
                return Ok(UploadOutcome::PreconditionFailed);
            }
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, body)?;
        Ok(UploadOutcome::Stored {
            etag: self.current_etag(),
        })
    }
}

/// In-memory endpoint with ETag semantics, used by tests to script races.
#[derive(Default)]
pub struct MemoryEndpoint {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    body: Option<Vec<u8>>,
    version: u64,
}

impl MemoryEndpoint {
    /// An endpoint with no server state yet.
    pub fn new() -> MemoryEndpoint {
        MemoryEndpoint::default()
    }

    /// The raw payload currently "on the server".
    pub fn body(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().body.clone()
    }
}

impl AppListEndpoint for MemoryEndpoint {
    fn download(&self) -> DesktopResult<Option<(Vec<u8>, Option<String>)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .body
            .as_ref()
            .map(|body| (body.clone(), Some(state.version.to_string()))))
    }

    fn upload(&self, body: &[u8], if_match: Option<&str>) -> DesktopResult<UploadOutcome> {
        let mut state = self.state.lock().unwrap();
        if let Some(tag) = if_match {
            if tag != state.version.to_string() {
                return Ok(UploadOutcome::PreconditionFailed);
            }
        }
        state.body = Some(body.to_vec());
        state.version += 1;
        Ok(UploadOutcome::Stored {
            etag: Some(state.version.to_string()),
        })
    }
}

/// Number of race retries before giving up with [`DesktopError::SyncRace`].
const MAX_SYNC_ATTEMPTS: u32 = 3;

/// Orchestrates download → merge → upload over an integration manager.
pub struct SyncManager {
    manager: IntegrationManager,
    endpoint: Box<dyn AppListEndpoint>,
    crypto_key: Option<String>,
    reference_file: AppListFile,
}

impl SyncManager {
    /// Layer syncing on top of an integration manager.
    pub fn new(
        manager: IntegrationManager,
        endpoint: Box<dyn AppListEndpoint>,
        crypto_key: Option<String>,
        reference_path: Utf8PathBuf,
    ) -> SyncManager {
        SyncManager {
            manager,
            endpoint,
            crypto_key,
            reference_file: AppListFile::new(reference_path),
        }
    }

    /// The managed state, for inspection.
    pub fn manager(&self) -> &IntegrationManager {
        &self.manager
    }

    /// Hand the integration manager back.
    pub fn into_manager(self) -> IntegrationManager {
        self.manager
    }

    /// Run one sync cycle, retrying on upload races.
    pub fn sync(&mut self, reset: SyncResetMode) -> DesktopResult<()> {
        let key = self.crypto_key.clone();
        for attempt in 1..=MAX_SYNC_ATTEMPTS {
            let (server_list, etag) = match self.endpoint.download()? {
                Some((body, etag)) => (transport::import(&body, key.as_deref())?, etag),
                None => (AppList::default(), None),
            };
            let mine = self.manager.app_list().clone();
            let reference = self.reference_file.load_safe();

            let merged = match reset {
                SyncResetMode::Client => server_list.clone(),
                SyncResetMode::Server => mine.clone(),
                SyncResetMode::Merge => three_way_merge(&mine, &server_list, &reference),
            };

            // entries we had realised that the merge dropped
            for entry in &mine.entries {
                if !merged.contains(&entry.interface_uri) {
                    self.manager.unapply_all(entry);
                }
            }

            if reset != SyncResetMode::Client && merged != server_list {
                let body = transport::export(&merged, key.as_deref())?;
                match self.endpoint.upload(&body, etag.as_deref())? {
                    UploadOutcome::Stored { .. } => {}
                    UploadOutcome::PreconditionFailed => {
                        tracing::warn!(
                            "sync race lost (attempt {attempt}/{MAX_SYNC_ATTEMPTS}), re-merging"
                        );
                        continue;
                    }
                }
            }

            self.manager.replace_list(merged.clone())?;
            self.reference_file.save(&merged)?;
            tracing::info!("sync complete ({} apps)", merged.entries.len());
            return Ok(());
        }
        Err(DesktopError::SyncRace)
    }
}

/// Combine both sides' changes relative to the last-sync reference.
///
/// Unchanged-on-one-side entries follow the other side (including
/// deletions); entries changed on both sides are contradictory and resolved
/// towards the newer timestamp, loudly.
fn three_way_merge(mine: &AppList, server: &AppList, reference: &AppList) -> AppList {
    let mut merged = AppList::default();
    merged.extra = mine.extra.clone();

    for entry in &mine.entries {
        let uri = &entry.interface_uri;
        let theirs = server.get(uri);
        let base = reference.get(uri);
        match theirs {
            Some(theirs) if theirs == entry => merged.entries.push(entry.clone()),
            Some(theirs) => {
                if base == Some(entry) {
                    // only the server changed it
                    merged.entries.push(theirs.clone());
                } else if base == Some(theirs) {
                    // only we changed it
                    merged.entries.push(entry.clone());
                } else {
                    let winner = if entry.timestamp >= theirs.timestamp {
                        entry
                    } else {
                        theirs
                    };
                    tracing::warn!(
                        "both sides changed {uri}; keeping the newer copy (timestamp {})",
                        winner.timestamp
                    );
                    merged.entries.push(winner.clone());
                }
            }
            None => {
                if base == Some(entry) {
                    tracing::debug!("{uri} was removed on the server");
                } else if base.is_none() {
                    // new on this machine
                    merged.entries.push(entry.clone());
                } else {
                    tracing::warn!(
                        "{uri} was changed here but removed on the server; keeping it"
                    );
                    merged.entries.push(entry.clone());
                }
            }
        }
    }

    for theirs in &server.entries {
        let uri = &theirs.interface_uri;
        if mine.contains(uri) {
            continue;
        }
        let base = reference.get(uri);
        if base == Some(theirs) {
            tracing::debug!("{uri} was removed locally");
        } else if base.is_none() {
            // new on the server
            merged.entries.push(theirs.clone());
        } else {
            tracing::warn!("{uri} was changed on the server but removed here; keeping it");
            merged.entries.push(theirs.clone());
        }
    }

    merged
}
