//! A builder that computes a manifest without touching the filesystem.

use std::collections::BTreeMap;
use std::io::Read;

use super::{Builder, RelativePath};
use crate::errors::{StoreError, StoreResult};
use crate::manifest::{Manifest, ManifestEntry, ManifestFormat};

#[derive(Debug, Clone)]
enum FileNode {
    File {
        executable: bool,
        hash: String,
        mtime: i64,
        size: u64,
    },
    Symlink {
        hash: String,
        size: u64,
    },
}

#[derive(Debug, Default)]
struct DirNode {
    files: BTreeMap<String, FileNode>,
    dirs: BTreeMap<String, DirNode>,
}

impl DirNode {
    fn subdir_mut(&mut self, components: &[&str]) -> &mut DirNode {
        let mut node = self;
        for component in components {
            node = node.dirs.entry((*component).to_owned()).or_default();
        }
        node
    }

    fn lookup_file(&self, components: &[&str], name: &str) -> Option<&FileNode> {
        let mut node = self;
        for component in components {
            node = node.dirs.get(*component)?;
        }
        node.files.get(name)
    }

    fn emit(&self, rel: &str, out: &mut Vec<ManifestEntry>) {
        for (name, file) in &self.files {
            out.push(match file {
                FileNode::File {
                    executable,
                    hash,
                    mtime,
                    size,
                } => ManifestEntry::File {
                    executable: *executable,
                    hash: hash.clone(),
                    mtime: *mtime,
                    size: *size,
                    name: name.clone(),
                },
                FileNode::Symlink { hash, size } => ManifestEntry::Symlink {
                    hash: hash.clone(),
                    size: *size,
                    name: name.clone(),
                },
            });
        }
        for (name, dir) in &self.dirs {
            let child_rel = if rel.is_empty() {
                name.clone()
            } else {
                format!("{rel}/{name}")
            };
            out.push(ManifestEntry::Dir {
                path: format!("/{child_rel}"),
            });
            dir.emit(&child_rel, out);
        }
    }
}

/// Computes the manifest an extraction *would* produce, in memory.
///
/// Useful for digesting an archive stream without staging it on disk, and
/// as the reference implementation the directory builder is tested against.
pub struct ManifestBuilder {
    format: ManifestFormat,
    root: DirNode,
    pending_hardlinks: Vec<(RelativePath, RelativePath)>,
}

impl ManifestBuilder {
    /// A new in-memory builder for the given format.
    pub fn new(format: ManifestFormat) -> ManifestBuilder {
        ManifestBuilder {
            format,
            root: DirNode::default(),
            pending_hardlinks: Vec::new(),
        }
    }

    /// The manifest accumulated so far. Call after [`Builder::finish`].
    pub fn into_manifest(self) -> Manifest {
        let mut entries = Vec::new();
        self.root.emit("", &mut entries);
        Manifest::from_entries(self.format, entries)
    }

    fn split(path: &RelativePath) -> (Vec<&str>, &str) {
        let mut components: Vec<&str> = path.as_str().split('/').collect();
        let name = components.pop().expect("relative paths are never empty");
        (components, name)
    }

    fn insert(&mut self, path: &RelativePath, node: FileNode) {
        let (dirs, name) = Self::split(path);
        let parent = self.root.subdir_mut(&dirs);
        parent.dirs.remove(name);
        parent.files.insert(name.to_owned(), node);
    }
}

impl Builder for ManifestBuilder {
    fn add_directory(&mut self, path: &RelativePath, _mtime: Option<i64>) -> StoreResult<()> {
        let components: Vec<&str> = path.as_str().split('/').collect();
        self.root.subdir_mut(&components);
        Ok(())
    }

    fn add_file(
        &mut self,
        path: &RelativePath,
        reader: &mut dyn Read,
        mtime: i64,
        executable: bool,
    ) -> StoreResult<()> {
        let (hash, size) = self.format.hash_contents(reader)?;
        self.insert(
            path,
            FileNode::File {
                executable,
                hash,
                mtime,
                size,
            },
        );
        Ok(())
    }

    fn add_symlink(&mut self, path: &RelativePath, target: &str) -> StoreResult<()> {
        let (hash, size) = self.format.hash_contents(&mut target.as_bytes())?;
        self.insert(path, FileNode::Symlink { hash, size });
        Ok(())
    }

    fn queue_hardlink(
        &mut self,
        path: &RelativePath,
        target: &RelativePath,
        _executable: bool,
    ) -> StoreResult<()> {
        self.pending_hardlinks.push((path.clone(), target.clone()));
        Ok(())
    }

    fn finish(&mut self) -> StoreResult<()> {
        for (path, target) in std::mem::take(&mut self.pending_hardlinks) {
            let (dirs, name) = Self::split(&target);
            let node = self
                .root
                .lookup_file(&dirs, name)
                .cloned()
                .ok_or_else(|| {
                    StoreError::invalid(format!(
                        "hardlink {path} points at {target}, which was never added"
                    ))
                })?;
            self.insert(&path, node);
        }
        Ok(())
    }
}
