#![deny(missing_docs)]

//! # zeroinstall-store
//!
//! The content-addressed implementation store and everything feeding it:
//!
//! * the **manifest engine** — canonical, hashable text form of a directory
//!   tree; the hash is the store's primary key
//! * the **builder** abstraction — a forward-only sink extractors and
//!   cloners drive, with a disk-backed and an in-memory implementation
//! * the **archive extraction pipeline** — zip, the tar family, 7z, rar,
//!   ruby gems, and (on Windows) cab/msi, all replayed through a builder
//! * the **store** itself — atomic add, lookup, verify, remove and
//!   hardlink-based optimise, safe against concurrent use
//!
//! Long operations take a [`TaskHandler`], which supplies the cancellation
//! token and answers any questions; nothing here talks to a user directly.

pub mod builder;
pub mod errors;
pub mod extract;
mod fsutil;
pub mod manifest;
pub mod store;
pub mod task;

pub use builder::{Builder, DirectoryBuilder, ManifestBuilder, RelativePath};
pub use errors::{StoreError, StoreResult};
pub use extract::{ArchiveSource, mime};
pub use manifest::{Manifest, ManifestEntry, ManifestFormat, MANIFEST_FILE};
pub use store::{CompositeStore, ImplementationStore, StoreKind};
pub use task::{CancellationToken, SilentHandler, TaskHandler};
