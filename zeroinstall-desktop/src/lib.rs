#![deny(missing_docs)]

//! # zeroinstall-desktop
//!
//! Desktop integration on top of the app-list model: the single-writer
//! [`IntegrationManager`] guarded by a cross-process mutex, conflict
//! detection over access-point ids, category-based suggestions, three-way
//! app-list sync against a server, and the icon cache access points draw
//! from.
//!
//! The actual platform artefacts (menu entries, registry keys, `.desktop`
//! files) are written by a [`PlatformIntegration`] implementation injected
//! at construction; this crate decides *what* should exist and keeps the
//! persistent model consistent.

pub mod categories;
pub mod conflict;
pub mod errors;
pub mod icons;
pub mod integration;
pub mod persistence;
pub mod platform;
pub mod sync;

pub use conflict::check_for_conflicts;
pub use errors::{ConflictItem, ConflictKind, DesktopError, DesktopResult};
pub use icons::IconStore;
pub use integration::{IntegrationConfig, IntegrationManager};
pub use persistence::AppListFile;
pub use platform::{NoopPlatform, PlatformIntegration};
pub use sync::{
    AppListEndpoint, FileEndpoint, HttpEndpoint, MemoryEndpoint, SyncManager, SyncResetMode,
    UploadOutcome,
};
