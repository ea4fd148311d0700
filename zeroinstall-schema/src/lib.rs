#![deny(missing_docs)]

//! # zeroinstall-schema
//!
//! The shared data model of the Zero Install core: manifest digests (the
//! implementation store's primary key), the desktop-integration app list and
//! its XML wire format, the capability/access-point taxonomy, and the
//! encrypted ZIP container used for app-list sync.
//!
//! This crate is deliberately logic-free: conflict *detection*, store
//! operations and sync merging live in `zeroinstall-store` and
//! `zeroinstall-desktop`. What lives here is everything two processes (or
//! two machines) must agree on byte-for-byte.

pub mod access_points;
pub mod applist;
pub mod capabilities;
pub mod digest;
pub mod errors;
pub mod feed;
pub mod transport;
pub mod xml;

pub use access_points::{AccessPoint, AccessPointList, DefaultKind};
pub use applist::{AppEntry, AppList, XmlExtra, APP_LIST_NS};
pub use capabilities::{Capability, CapabilityList};
pub use digest::ManifestDigest;
pub use errors::SchemaError;
pub use feed::{EntryPoint, Feed, FeedTarget, Icon};
pub use xml::XmlElement;
