//! The manifest engine: canonical, hashable text form of a directory tree.
//!
//! A manifest lists every file, symlink and subdirectory of an
//! implementation in a deterministic order. Hashing the serialized manifest
//! yields the digest that names the implementation in the store; two
//! directory trees with identical canonical contents always produce
//! byte-identical manifests.

mod format;
mod generate;

use std::fmt;

use crate::errors::{StoreError, StoreResult};

pub use format::ManifestFormat;

/// Name of the manifest file stored inside each implementation directory.
pub const MANIFEST_FILE: &str = ".manifest";
/// Flag file carrying executable bits on filesystems without a POSIX mode.
pub const XBIT_FILE: &str = ".xbit";
/// Flag file carrying symlink targets on filesystems without symlinks.
pub const SYMLINK_FILE: &str = ".symlink";

/// One line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    /// A regular file
    File {
        /// Whether the file carries the executable bit
        executable: bool,
        /// Content hash, lowercase hex
        hash: String,
        /// Modification time, unix seconds
        mtime: i64,
        /// Size in bytes
        size: u64,
        /// File name within its directory
        name: String,
    },
    /// A symbolic link; the hash covers the link target bytes
    Symlink {
        /// Hash of the target bytes, lowercase hex
        hash: String,
        /// Length of the target in bytes
        size: u64,
        /// Link name within its directory
        name: String,
    },
    /// Separator starting the entries of a subdirectory
    Dir {
        /// Path of the subdirectory, rooted with a leading `/`
        path: String,
    },
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestEntry::File {
                executable,
                hash,
                mtime,
                size,
                name,
            } => {
                let kind = if *executable { "executable" } else { "file" };
                write!(f, "{kind} {hash} {mtime} {size} {name}")
            }
            ManifestEntry::Symlink { hash, size, name } => {
                write!(f, "symlink {hash} {size} {name}")
            }
            ManifestEntry::Dir { path } => write!(f, "dir {path}"),
        }
    }
}

/// A full manifest: an ordered sequence of entries plus the format that
/// determines hashing and digest rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    format: ManifestFormat,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from pre-computed entries (the in-memory builder).
    pub(crate) fn from_entries(format: ManifestFormat, entries: Vec<ManifestEntry>) -> Self {
        Manifest { format, entries }
    }

    /// Walk `root` and produce its canonical manifest.
    ///
    /// Entries within a directory are sorted by ordinal byte comparison,
    /// files before subdirectories; the walk checks `token` between files.
    pub fn generate(
        root: &camino::Utf8Path,
        format: ManifestFormat,
        token: &crate::task::CancellationToken,
    ) -> StoreResult<Manifest> {
        generate::generate(root, format, token)
    }

    /// The format this manifest was generated for.
    pub fn format(&self) -> ManifestFormat {
        self.format
    }

    /// The entries in canonical order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Serialize to the canonical, newline-terminated byte form.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// The digest value of this manifest (without the algorithm prefix).
    pub fn digest(&self) -> String {
        self.format.digest_manifest(&self.serialize())
    }

    /// The digest id of this manifest: `<algorithm>_<digest>`.
    pub fn digest_id(&self) -> String {
        format!("{}_{}", self.format.prefix(), self.digest())
    }

    /// Parse the inverse of [`Manifest::serialize`].
    pub fn parse(text: &str, format: ManifestFormat) -> StoreResult<Manifest> {
        let mut entries = Vec::new();
        for line in text.lines() {
            entries.push(parse_line(line)?);
        }
        Ok(Manifest { format, entries })
    }

    /// A copy of this manifest with odd mtime seconds rounded down.
    ///
    /// Some filesystems round timestamps to even seconds when copying;
    /// verification falls back to the rounded manifest once before giving
    /// up on a digest mismatch.
    pub fn with_rounded_timestamps(&self) -> Manifest {
        let entries = self
            .entries
            .iter()
            .map(|entry| match entry {
                ManifestEntry::File {
                    executable,
                    hash,
                    mtime,
                    size,
                    name,
                } => ManifestEntry::File {
                    executable: *executable,
                    hash: hash.clone(),
                    mtime: mtime & !1,
                    size: *size,
                    name: name.clone(),
                },
                other => other.clone(),
            })
            .collect();
        Manifest {
            format: self.format,
            entries,
        }
    }

    /// Total size of all file contents, in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| match entry {
                ManifestEntry::File { size, .. } | ManifestEntry::Symlink { size, .. } => *size,
                ManifestEntry::Dir { .. } => 0,
            })
            .sum()
    }
}

fn parse_line(line: &str) -> StoreResult<ManifestEntry> {
    let malformed = || StoreError::ManifestFormat {
        line: line.to_owned(),
    };
    let (kind, rest) = line.split_once(' ').ok_or_else(malformed)?;
    match kind {
        "file" | "executable" => {
            let mut parts = rest.splitn(4, ' ');
            let hash = parts.next().ok_or_else(malformed)?;
            let mtime = parts
                .next()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(malformed)?;
            let size = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(malformed)?;
            let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
            Ok(ManifestEntry::File {
                executable: kind == "executable",
                hash: hash.to_owned(),
                mtime,
                size,
                name: name.to_owned(),
            })
        }
        "symlink" => {
            let mut parts = rest.splitn(3, ' ');
            let hash = parts.next().ok_or_else(malformed)?;
            let size = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(malformed)?;
            let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
            Ok(ManifestEntry::Symlink {
                hash: hash.to_owned(),
                size,
                name: name.to_owned(),
            })
        }
        "dir" => {
            if !rest.starts_with('/') {
                return Err(malformed());
            }
            Ok(ManifestEntry::Dir {
                path: rest.to_owned(),
            })
        }
        _ => Err(malformed()),
    }
}
