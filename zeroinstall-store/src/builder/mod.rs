//! The builder abstraction: a forward-only sink for constructing an
//! implementation tree from arbitrary sources.
//!
//! Extractors and directory cloners drive a [`Builder`] without knowing
//! whether it writes to disk ([`DirectoryBuilder`]) or only computes a
//! manifest in memory ([`ManifestBuilder`]).

mod directory;
mod in_memory;

use std::fmt;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{StoreError, StoreResult};

pub use directory::DirectoryBuilder;
pub use in_memory::ManifestBuilder;

/// A normalised, validated path relative to a builder's root.
///
/// Always forward-slash separated, never empty, and never able to escape
/// the root: `..` components, absolute paths and drive letters are rejected
/// at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    /// Validate and normalise a path.
    pub fn new(raw: &str) -> StoreResult<RelativePath> {
        match Self::normalise(raw)? {
            Some(path) => Ok(path),
            None => Err(StoreError::invalid(format!(
                "empty relative path: {raw:?}"
            ))),
        }
    }

    /// Normalise an archive entry name, applying sub-path selection.
    ///
    /// Returns `Ok(None)` for entries that should be silently dropped: the
    /// archive root itself, and entries outside `subdir` when one is given.
    /// Entries whose normalised path would escape the root are an error.
    pub fn from_archive_entry(
        raw: &str,
        subdir: Option<&RelativePath>,
    ) -> StoreResult<Option<RelativePath>> {
        let Some(path) = Self::normalise(raw)? else {
            return Ok(None);
        };
        match subdir {
            None => Ok(Some(path)),
            Some(prefix) => Ok(path.strip_prefix(prefix)),
        }
    }

    fn normalise(raw: &str) -> StoreResult<Option<RelativePath>> {
        let unified = raw.replace('\\', "/");
        let mut components = Vec::new();
        for component in unified.split('/') {
            match component {
                "" | "." => continue,
                ".." => {
                    return Err(StoreError::invalid(format!(
                        "path escapes the extraction root: {raw:?}"
                    )))
                }
                _ if component.contains(':') => {
                    return Err(StoreError::invalid(format!(
                        "path contains a drive or stream separator: {raw:?}"
                    )))
                }
                _ => components.push(component),
            }
        }
        if components.is_empty() {
            return Ok(None);
        }
        Ok(Some(RelativePath(components.join("/"))))
    }

    /// The normalised path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve under a filesystem root.
    pub fn join_under(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join(&self.0)
    }

    /// This path re-rooted below `prefix`.
    pub fn prepend(&self, prefix: &RelativePath) -> RelativePath {
        RelativePath(format!("{}/{}", prefix.0, self.0))
    }

    /// Strip `prefix` off the front, on component boundaries.
    ///
    /// Returns `None` when this path equals the prefix or lies outside it.
    pub fn strip_prefix(&self, prefix: &RelativePath) -> Option<RelativePath> {
        let rest = self.0.strip_prefix(&prefix.0)?;
        let rest = rest.strip_prefix('/')?;
        Some(RelativePath(rest.to_owned()))
    }

    /// Parent directory components, excluding the path itself.
    pub fn parent(&self) -> Option<RelativePath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| RelativePath(parent.to_owned()))
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Forward-only sink for building an implementation tree.
///
/// Operations arrive in the source's own order; later operations on the
/// same path overwrite earlier ones (archive overlays rely on this).
/// Queued hardlinks resolve when `finish` is called and fail if their
/// target was never added.
pub trait Builder {
    /// Ensure a directory exists at `path`.
    fn add_directory(&mut self, path: &RelativePath, mtime: Option<i64>) -> StoreResult<()>;

    /// Add a regular file with the given content stream.
    fn add_file(
        &mut self,
        path: &RelativePath,
        reader: &mut dyn Read,
        mtime: i64,
        executable: bool,
    ) -> StoreResult<()>;

    /// Add a symlink pointing at `target` (an arbitrary string, not
    /// validated: symlinks may legitimately point outside the tree).
    fn add_symlink(&mut self, path: &RelativePath, target: &str) -> StoreResult<()>;

    /// Record a hardlink to be resolved at [`Builder::finish`].
    fn queue_hardlink(
        &mut self,
        path: &RelativePath,
        target: &RelativePath,
        executable: bool,
    ) -> StoreResult<()>;

    /// Resolve queued hardlinks and write any deferred metadata.
    fn finish(&mut self) -> StoreResult<()>;
}

/// A view of another builder with every path re-rooted below a prefix.
///
/// Used for archives with a `destination_subdir`; `finish` is intentionally
/// not forwarded since the caller finishes the underlying builder once after
/// all overlays.
pub struct PrefixedBuilder<'a> {
    inner: &'a mut dyn Builder,
    prefix: RelativePath,
}

impl<'a> PrefixedBuilder<'a> {
    /// Wrap `inner`, placing everything below `prefix`.
    pub fn new(inner: &'a mut dyn Builder, prefix: RelativePath) -> StoreResult<Self> {
        inner.add_directory(&prefix, None)?;
        Ok(PrefixedBuilder { inner, prefix })
    }
}

impl Builder for PrefixedBuilder<'_> {
    fn add_directory(&mut self, path: &RelativePath, mtime: Option<i64>) -> StoreResult<()> {
        self.inner.add_directory(&path.prepend(&self.prefix), mtime)
    }

    fn add_file(
        &mut self,
        path: &RelativePath,
        reader: &mut dyn Read,
        mtime: i64,
        executable: bool,
    ) -> StoreResult<()> {
        self.inner
            .add_file(&path.prepend(&self.prefix), reader, mtime, executable)
    }

    fn add_symlink(&mut self, path: &RelativePath, target: &str) -> StoreResult<()> {
        self.inner.add_symlink(&path.prepend(&self.prefix), target)
    }

    fn queue_hardlink(
        &mut self,
        path: &RelativePath,
        target: &RelativePath,
        executable: bool,
    ) -> StoreResult<()> {
        self.inner.queue_hardlink(
            &path.prepend(&self.prefix),
            &target.prepend(&self.prefix),
            executable,
        )
    }

    fn finish(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_separators_and_prefixes() {
        assert_eq!(RelativePath::new("a/b").unwrap().as_str(), "a/b");
        assert_eq!(RelativePath::new("./a//b/").unwrap().as_str(), "a/b");
        assert_eq!(RelativePath::new(r"dir\file").unwrap().as_str(), "dir/file");
        assert_eq!(RelativePath::new("/rooted").unwrap().as_str(), "rooted");
    }

    #[test]
    fn rejects_escapes() {
        assert!(RelativePath::new("../evil").is_err());
        assert!(RelativePath::new("ok/../../evil").is_err());
        assert!(RelativePath::new(r"C:\windows").is_err());
        assert!(RelativePath::new("").is_err());
        assert!(RelativePath::new("./").is_err());
    }

    #[test]
    fn archive_entries_respect_subdir_selection() {
        let subdir = RelativePath::new("bin").unwrap();
        let inside =
            RelativePath::from_archive_entry("./bin/foo", Some(&subdir)).unwrap();
        assert_eq!(inside.unwrap().as_str(), "foo");

        let outside = RelativePath::from_archive_entry("share/doc", Some(&subdir)).unwrap();
        assert!(outside.is_none());

        // "binx/foo" shares the string prefix but not the component
        let sneaky = RelativePath::from_archive_entry("binx/foo", Some(&subdir)).unwrap();
        assert!(sneaky.is_none());

        // the subdir itself is the new root, not an entry
        let root = RelativePath::from_archive_entry("bin/", Some(&subdir)).unwrap();
        assert!(root.is_none());
    }

    #[test]
    fn escaping_archive_entries_are_errors_not_drops() {
        assert!(RelativePath::from_archive_entry("../../etc/passwd", None).is_err());
    }
}
