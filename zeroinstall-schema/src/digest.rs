//! Manifest digests, the primary key of the implementation store.

use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, SchemaError};

/// Algorithm prefix for the `sha1new` manifest format
pub const ALGO_SHA1NEW: &str = "sha1new";
/// Algorithm prefix for the `sha256` manifest format
pub const ALGO_SHA256: &str = "sha256";
/// Algorithm prefix for the `sha256new` manifest format
pub const ALGO_SHA256NEW: &str = "sha256new";

/// An unordered collection of digest values for one implementation, at most
/// one per manifest algorithm.
///
/// Two digests refer to the same implementation if they agree on *any*
/// algorithm they both carry; stronger algorithms are preferred when a single
/// value is needed (`sha256new` > `sha256` > `sha1new`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDigest {
    /// SHA-1 over the manifest, lowercase hex
    pub sha1new: Option<String>,
    /// SHA-256 over the manifest, lowercase hex
    pub sha256: Option<String>,
    /// SHA-256 over the manifest, unpadded base32
    pub sha256new: Option<String>,
}

impl ManifestDigest {
    /// Parse a single `<algorithm>_<value>` id, e.g. a store directory name.
    pub fn from_id(id: &str) -> Result<Self> {
        let (algo, value) = id
            .split_once('_')
            .ok_or_else(|| SchemaError::BadDigest { id: id.to_owned() })?;
        if value.is_empty() {
            return Err(SchemaError::BadDigest { id: id.to_owned() });
        }
        let mut digest = Self::default();
        match algo {
            ALGO_SHA1NEW => digest.sha1new = Some(value.to_owned()),
            ALGO_SHA256 => digest.sha256 = Some(value.to_owned()),
            ALGO_SHA256NEW => digest.sha256new = Some(value.to_owned()),
            _ => return Err(SchemaError::BadDigest { id: id.to_owned() }),
        }
        Ok(digest)
    }

    /// The strongest available id, serialized as `<algorithm>_<value>`.
    pub fn best(&self) -> Option<String> {
        self.ids().into_iter().next()
    }

    /// All ids this digest carries, strongest first.
    pub fn ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(v) = &self.sha256new {
            ids.push(format!("{ALGO_SHA256NEW}_{v}"));
        }
        if let Some(v) = &self.sha256 {
            ids.push(format!("{ALGO_SHA256}_{v}"));
        }
        if let Some(v) = &self.sha1new {
            ids.push(format!("{ALGO_SHA1NEW}_{v}"));
        }
        ids
    }

    /// Whether this digest carries no values at all.
    pub fn is_empty(&self) -> bool {
        self.sha1new.is_none() && self.sha256.is_none() && self.sha256new.is_none()
    }

    /// Partial equality: do the two digests share any algorithm value?
    pub fn matches(&self, other: &ManifestDigest) -> bool {
        fn agree(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if x == y)
        }
        agree(&self.sha1new, &other.sha1new)
            || agree(&self.sha256, &other.sha256)
            || agree(&self.sha256new, &other.sha256new)
    }

    /// Merge another id into this digest, keeping existing values.
    pub fn merge_id(&mut self, id: &str) -> Result<()> {
        let parsed = Self::from_id(id)?;
        if self.sha1new.is_none() {
            self.sha1new = parsed.sha1new;
        }
        if self.sha256.is_none() {
            self.sha256 = parsed.sha256;
        }
        if self.sha256new.is_none() {
            self.sha256new = parsed.sha256new;
        }
        Ok(())
    }
}

impl fmt::Display for ManifestDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.best() {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "(no digest)"),
        }
    }
}

impl FromStr for ManifestDigest {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_id(s)
    }
}
