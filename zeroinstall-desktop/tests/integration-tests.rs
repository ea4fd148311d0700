//! End-to-end tests of the integration manager and sync layer.

use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use zeroinstall_desktop::{
    AppListEndpoint, ConflictKind, DesktopError, IconStore, IntegrationConfig,
    IntegrationManager, MemoryEndpoint, NoopPlatform, SyncManager, SyncResetMode,
    UploadOutcome,
};
use zeroinstall_schema::{
    transport, AccessPoint, AppEntry, AppList, Capability, CapabilityList, DefaultKind, Feed,
    FeedTarget,
};

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

fn manager(dir: &Utf8PathBuf, tag: &str) -> IntegrationManager {
    let config = IntegrationConfig {
        app_list_path: dir.join(format!("{tag}/app-list.xml")),
        machine_wide: false,
        mutex_name: Some(format!("zeroinstall-test-{tag}-{}", std::process::id())),
    };
    let icons = IconStore::new(dir.join(format!("{tag}/icons"))).unwrap();
    IntegrationManager::new(config, Box::new(NoopPlatform), icons).unwrap()
}

fn txt_feed(name: &str, capability_id: &str) -> Feed {
    Feed {
        name: name.to_owned(),
        capability_lists: vec![CapabilityList {
            os: None,
            entries: vec![Capability::FileType {
                id: capability_id.to_owned(),
                extensions: vec![".txt".to_owned()],
            }],
            unknown: Vec::new(),
        }],
        ..Default::default()
    }
}

fn txt_points(capability_id: &str) -> Vec<AccessPoint> {
    vec![
        AccessPoint::CapabilityRegistration,
        AccessPoint::Default {
            kind: DefaultKind::FileType,
            capability: capability_id.to_owned(),
        },
    ]
}

#[test]
fn app_lifecycle_persists_through_the_file() {
    let work = tempfile::tempdir().unwrap();
    let dir = utf8(work.path());

    let target = FeedTarget {
        uri: "https://example.com/editor.xml".to_owned(),
        feed: txt_feed("Editor", "editor.txt"),
    };

    let mut mgr = manager(&dir, "lifecycle");
    mgr.add_app(&target).unwrap();
    mgr.add_access_points(&target, txt_points("editor.txt")).unwrap();

    let entry = mgr.app_list().get(&target.uri).unwrap();
    assert_eq!(entry.name, "Editor");
    assert_eq!(entry.access_points.as_ref().unwrap().entries.len(), 2);
    assert!(entry.timestamp > 0);

    // a second add of the same app is rejected
    assert!(matches!(
        mgr.add_app(&target),
        Err(DesktopError::InvalidData { .. })
    ));

    // the state survives on disk (drop the manager to release the mutex)
    let path = dir.join("lifecycle/app-list.xml");
    drop(mgr);
    let text = std::fs::read_to_string(path).unwrap();
    let reloaded = AppList::from_xml(&text).unwrap();
    assert!(reloaded.contains("https://example.com/editor.xml"));

    let mut mgr = manager(&dir, "lifecycle");
    mgr.remove_app("https://example.com/editor.xml").unwrap();
    assert!(mgr.app_list().entries.is_empty());
    assert!(matches!(
        mgr.remove_app("https://example.com/editor.xml"),
        Err(DesktopError::NotFound { .. })
    ));
}

#[test]
fn two_apps_claiming_the_same_extension_conflict() {
    let work = tempfile::tempdir().unwrap();
    let dir = utf8(work.path());
    let mut mgr = manager(&dir, "conflict");

    let first = FeedTarget {
        uri: "https://example.com/first.xml".to_owned(),
        feed: txt_feed("First", "myapp.txt"),
    };
    let second = FeedTarget {
        uri: "https://example.com/second.xml".to_owned(),
        feed: txt_feed("Second", "myapp.txt"),
    };

    mgr.add_app(&first).unwrap();
    mgr.add_app(&second).unwrap();
    mgr.add_access_points(&first, txt_points("myapp.txt")).unwrap();

    let err = mgr
        .add_access_points(&second, txt_points("myapp.txt"))
        .unwrap_err();
    match err {
        DesktopError::Conflict { kind, entries } => {
            assert_eq!(kind, ConflictKind::New);
            let uris: Vec<&str> = entries.iter().map(|e| e.interface_uri.as_str()).collect();
            assert!(uris.contains(&"https://example.com/first.xml"));
            assert!(uris.contains(&"https://example.com/second.xml"));
        }
        other => panic!("expected a conflict, got {other:?}"),
    }

    // the failed attempt left no points behind
    let entry = mgr.app_list().get(&second.uri).unwrap();
    assert!(entry.access_points.is_none());
}

#[test]
fn hostname_filter_records_without_realising() {
    let work = tempfile::tempdir().unwrap();
    let dir = utf8(work.path());
    let mut mgr = manager(&dir, "hostname");

    let target = FeedTarget {
        uri: "https://example.com/remote.xml".to_owned(),
        feed: txt_feed("Remote", "remote.txt"),
    };
    mgr.add_app(&target).unwrap();
    {
        // set the filter on the stored entry through an update round-trip
        let mut entry = mgr.app_list().get(&target.uri).unwrap().clone();
        entry.hostname_regex = Some("^no-machine-is-called-this$".to_owned());
        let mut list = mgr.app_list().clone();
        *list.get_mut(&target.uri).unwrap() = entry;
        drop(mgr);
        let file = zeroinstall_desktop::AppListFile::new(dir.join("hostname/app-list.xml"));
        file.save(&list).unwrap();
    }

    let mut mgr = manager(&dir, "hostname");
    mgr.add_access_points(&target, txt_points("remote.txt")).unwrap();
    let entry = mgr.app_list().get(&target.uri).unwrap();
    // persisted, even though nothing was realised on this machine
    assert_eq!(entry.access_points.as_ref().unwrap().entries.len(), 2);
}

#[test]
fn second_manager_on_the_same_mutex_is_rejected() {
    let work = tempfile::tempdir().unwrap();
    let dir = utf8(work.path());

    let name = format!("zeroinstall-test-exclusive-{}", std::process::id());
    let config = |sub: &str| IntegrationConfig {
        app_list_path: dir.join(format!("{sub}/app-list.xml")),
        machine_wide: false,
        mutex_name: Some(name.clone()),
    };

    let first = IntegrationManager::new(
        config("a"),
        Box::new(NoopPlatform),
        IconStore::new(dir.join("a/icons")).unwrap(),
    )
    .unwrap();

    let second = IntegrationManager::new(
        config("b"),
        Box::new(NoopPlatform),
        IconStore::new(dir.join("b/icons")).unwrap(),
    );
    assert!(matches!(
        second,
        Err(DesktopError::AnotherInstanceActive)
    ));

    // releasing the first frees the name
    drop(first);
    IntegrationManager::new(
        config("c"),
        Box::new(NoopPlatform),
        IconStore::new(dir.join("c/icons")).unwrap(),
    )
    .unwrap();
}

/// Shares one in-memory server and lets the test inject a competing upload
/// between a client's download and its upload.
struct RacingEndpoint {
    inner: Arc<MemoryEndpoint>,
    interloper: Mutex<Option<Vec<u8>>>,
}

impl AppListEndpoint for RacingEndpoint {
    fn download(&self) -> zeroinstall_desktop::DesktopResult<Option<(Vec<u8>, Option<String>)>> {
        self.inner.download()
    }

    fn upload(
        &self,
        body: &[u8],
        if_match: Option<&str>,
    ) -> zeroinstall_desktop::DesktopResult<UploadOutcome> {
        if let Some(competing) = self.interloper.lock().unwrap().take() {
            // someone else gets their upload in first
            let outcome = self.inner.upload(&competing, None)?;
            assert!(matches!(outcome, UploadOutcome::Stored { .. }));
        }
        self.inner.upload(body, if_match)
    }
}

#[test]
fn sync_race_retries_and_preserves_both_changes() {
    let work = tempfile::tempdir().unwrap();
    let dir = utf8(work.path());

    let server = Arc::new(MemoryEndpoint::new());

    // the server starts with a baseline list
    let mut base_list = AppList::default();
    base_list
        .entries
        .push(AppEntry::new("uri:base", "Base"));
    let seeded = transport::export(&base_list, None).unwrap();
    server.upload(&seeded, None).unwrap();

    // the racing client's state: baseline (as last-sync reference) plus
    // its own new app
    let mgr = manager(&dir, "race");
    let reference_path = dir.join("race/app-list.xml.last-sync");
    zeroinstall_desktop::AppListFile::new(reference_path.clone())
        .save(&base_list)
        .unwrap();

    let mut client_list = base_list.clone();
    client_list.entries.push(AppEntry::new("uri:from-b", "B"));
    zeroinstall_desktop::AppListFile::new(dir.join("race/app-list.xml"))
        .save(&client_list)
        .unwrap();
    drop(mgr);
    let mgr = manager(&dir, "race");

    // the interloper (client A) adds its own app meanwhile
    let mut interloper_list = base_list.clone();
    interloper_list
        .entries
        .push(AppEntry::new("uri:from-a", "A"));
    let interloper_body = transport::export(&interloper_list, None).unwrap();

    let endpoint = RacingEndpoint {
        inner: Arc::clone(&server),
        interloper: Mutex::new(Some(interloper_body)),
    };

    let mut sync = SyncManager::new(mgr, Box::new(endpoint), None, reference_path);
    sync.sync(SyncResetMode::Merge).unwrap();

    // the final server state carries both sides' additions
    let final_list = transport::import(&server.body().unwrap(), None).unwrap();
    assert!(final_list.contains("uri:base"));
    assert!(final_list.contains("uri:from-a"));
    assert!(final_list.contains("uri:from-b"));

    // and so does the local list
    let local = sync.manager().app_list();
    assert!(local.contains("uri:from-a"));
    assert!(local.contains("uri:from-b"));
}

#[test]
fn sync_reset_modes_pick_a_side() {
    let work = tempfile::tempdir().unwrap();
    let dir = utf8(work.path());

    let mut server_list = AppList::default();
    server_list
        .entries
        .push(AppEntry::new("uri:server-only", "S"));
    let server = Arc::new(MemoryEndpoint::new());
    server
        .upload(&transport::export(&server_list, None).unwrap(), None)
        .unwrap();

    struct Shared(Arc<MemoryEndpoint>);
    impl AppListEndpoint for Shared {
        fn download(
            &self,
        ) -> zeroinstall_desktop::DesktopResult<Option<(Vec<u8>, Option<String>)>> {
            self.0.download()
        }
        fn upload(
            &self,
            body: &[u8],
            if_match: Option<&str>,
        ) -> zeroinstall_desktop::DesktopResult<UploadOutcome> {
            self.0.upload(body, if_match)
        }
    }

    // Client mode: the server list replaces local state
    let mut local_list = AppList::default();
    local_list.entries.push(AppEntry::new("uri:local-only", "L"));
    zeroinstall_desktop::AppListFile::new(dir.join("reset-client/app-list.xml"))
        .save(&local_list)
        .unwrap();
    let mgr = manager(&dir, "reset-client");
    let mut sync = SyncManager::new(
        mgr,
        Box::new(Shared(Arc::clone(&server))),
        None,
        dir.join("reset-client/app-list.xml.last-sync"),
    );
    sync.sync(SyncResetMode::Client).unwrap();
    let local = sync.manager().app_list();
    assert!(local.contains("uri:server-only"));
    assert!(!local.contains("uri:local-only"));

    // Server mode: local state replaces the server list
    zeroinstall_desktop::AppListFile::new(dir.join("reset-server/app-list.xml"))
        .save(&local_list)
        .unwrap();
    let mgr = manager(&dir, "reset-server");
    let mut sync = SyncManager::new(
        mgr,
        Box::new(Shared(Arc::clone(&server))),
        None,
        dir.join("reset-server/app-list.xml.last-sync"),
    );
    sync.sync(SyncResetMode::Server).unwrap();
    let on_server = transport::import(&server.body().unwrap(), None).unwrap();
    assert!(on_server.contains("uri:local-only"));
    assert!(!on_server.contains("uri:server-only"));
}

#[test]
fn encrypted_sync_round_trips_and_rejects_wrong_keys() {
    let work = tempfile::tempdir().unwrap();
    let dir = utf8(work.path());

    let server = Arc::new(MemoryEndpoint::new());
    struct Shared(Arc<MemoryEndpoint>);
    impl AppListEndpoint for Shared {
        fn download(
            &self,
        ) -> zeroinstall_desktop::DesktopResult<Option<(Vec<u8>, Option<String>)>> {
            self.0.download()
        }
        fn upload(
            &self,
            body: &[u8],
            if_match: Option<&str>,
        ) -> zeroinstall_desktop::DesktopResult<UploadOutcome> {
            self.0.upload(body, if_match)
        }
    }

    let mut local_list = AppList::default();
    local_list.entries.push(AppEntry::new("uri:secret", "S"));
    zeroinstall_desktop::AppListFile::new(dir.join("crypto/app-list.xml"))
        .save(&local_list)
        .unwrap();
    let mgr = manager(&dir, "crypto");
    let mut sync = SyncManager::new(
        mgr,
        Box::new(Shared(Arc::clone(&server))),
        Some("correct horse".to_owned()),
        dir.join("crypto/app-list.xml.last-sync"),
    );
    sync.sync(SyncResetMode::Merge).unwrap();

    // ciphertext on the wire, readable only with the key
    let body = server.body().unwrap();
    assert!(transport::import(&body, Some("correct horse")).unwrap().contains("uri:secret"));
    assert!(matches!(
        transport::import(&body, Some("wrong")),
        Err(zeroinstall_schema::SchemaError::CryptoKeyInvalid)
    ));

    // a second client with the wrong key surfaces CryptoKeyInvalid
    let mgr = manager(&dir, "crypto2");
    let mut sync = SyncManager::new(
        mgr,
        Box::new(Shared(Arc::clone(&server))),
        Some("wrong".to_owned()),
        dir.join("crypto2/app-list.xml.last-sync"),
    );
    assert!(matches!(
        sync.sync(SyncResetMode::Merge),
        Err(DesktopError::CryptoKeyInvalid)
    ));
}
