//! Extractors that stage through a temporary directory, plus the shared
//! feeder that replays a directory tree into a builder.
//!
//! The 7z and rar libraries are whole-archive extractors rather than entry
//! streams, so both unpack into a staging directory which is then walked
//! into the target builder. The same feeder clones plain directories when
//! the store adds one directly.

use std::fs;
use std::io::Read;

use camino::Utf8Path;

use super::{mime, ArchiveSource};
use crate::builder::{Builder, RelativePath};
use crate::errors::{StoreError, StoreResult};
use crate::task::CancellationToken;

/// Replay the contents of `dir` into a builder, honouring sub-path
/// selection the same way archive extraction does.
pub fn feed_directory(
    builder: &mut dyn Builder,
    dir: &Utf8Path,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let walker = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    for item in walker {
        token.check()?;
        let item = item.map_err(|err| StoreError::invalid(format!("walk failed: {err}")))?;
        let rel = item
            .path()
            .strip_prefix(dir)
            .expect("walkdir yields children of its root");
        let rel: Vec<&str> = rel
            .components()
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .ok_or_else(|| StoreError::invalid("non-UTF-8 name in staged tree"))
            })
            .collect::<StoreResult<_>>()?;
        let Some(path) = RelativePath::from_archive_entry(&rel.join("/"), subdir)? else {
            continue;
        };

        let meta = item.metadata().map_err(|err| {
            StoreError::invalid(format!("metadata failed below {dir}: {err}"))
        })?;
        let mtime = filetime::FileTime::from_last_modification_time(&meta).unix_seconds();

        if item.path_is_symlink() {
            let target = fs::read_link(item.path())?;
            let target = target
                .to_str()
                .ok_or_else(|| StoreError::invalid("non-UTF-8 symlink target"))?;
            builder.add_symlink(&path, target)?;
        } else if meta.is_dir() {
            builder.add_directory(&path, Some(mtime))?;
        } else {
            let mut file = fs::File::open(item.path())?;
            builder.add_file(&path, &mut file, mtime, is_executable(&meta))?;
        }
    }
    Ok(())
}

pub(super) fn extract_7z(
    source: &ArchiveSource,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let mime_type = mime::SEVEN_ZIP;
    let archive_path = materialize(source)?;
    let staging = tempfile::tempdir()?;
    sevenz_rust::decompress_file(archive_path.as_path(), staging.path())
        .map_err(|err| StoreError::damaged(mime_type, format!("{err:?}")))?;
    token.check()?;
    let staged = Utf8Path::from_path(staging.path())
        .ok_or_else(|| StoreError::invalid("non-UTF-8 temp dir"))?;
    feed_directory(builder, staged, subdir, token)
}

pub(super) fn extract_rar(
    source: &ArchiveSource,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let mime_type = mime::RAR;
    let archive_path = materialize(source)?;
    let staging = tempfile::tempdir()?;

    let mut archive = unrar::Archive::new(archive_path.as_path())
        .open_for_processing()
        .map_err(|err| StoreError::damaged(mime_type, format!("{err:?}")))?;
    while let Some(header) = archive
        .read_header()
        .map_err(|err| StoreError::damaged(mime_type, format!("{err:?}")))?
    {
        token.check()?;
        archive = header
            .extract_with_base(staging.path())
            .map_err(|err| StoreError::damaged(mime_type, format!("{err:?}")))?;
    }

    let staged = Utf8Path::from_path(staging.path())
        .ok_or_else(|| StoreError::invalid("non-UTF-8 temp dir"))?;
    feed_directory(builder, staged, subdir, token)
}

/// The staged extractors need a real file starting at the archive bytes;
/// spill to a temp file when a start offset is in play.
struct MaterializedArchive {
    path: std::path::PathBuf,
    _spill: Option<tempfile::NamedTempFile>,
}

impl MaterializedArchive {
    fn as_path(&self) -> &std::path::Path {
        &self.path
    }
}

fn materialize(source: &ArchiveSource) -> StoreResult<MaterializedArchive> {
    if source.start_offset == 0 {
        return Ok(MaterializedArchive {
            path: source.path.as_std_path().to_path_buf(),
            _spill: None,
        });
    }
    let mut file = fs::File::open(&source.path)?;
    std::io::Seek::seek(&mut file, std::io::SeekFrom::Start(source.start_offset))?;
    let mut spill = tempfile::NamedTempFile::new()?;
    let mut remainder: Vec<u8> = Vec::new();
    file.read_to_end(&mut remainder)?;
    std::io::Write::write_all(&mut spill, &remainder)?;
    Ok(MaterializedArchive {
        path: spill.path().to_path_buf(),
        _spill: Some(spill),
    })
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ManifestBuilder;
    use crate::manifest::ManifestFormat;

    #[test]
    fn feeder_matches_the_manifest_walk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/data"), "d").unwrap();
        fs::write(dir.path().join("top"), "t").unwrap();
        for name in ["sub/data", "top"] {
            filetime::set_file_mtime(
                dir.path().join(name),
                filetime::FileTime::from_unix_time(500, 0),
            )
            .unwrap();
        }

        let root = Utf8Path::from_path(dir.path()).unwrap();
        let mut builder = ManifestBuilder::new(ManifestFormat::Sha256New);
        feed_directory(&mut builder, root, None, &CancellationToken::new()).unwrap();
        builder.finish().unwrap();
        let fed = builder.into_manifest();

        let walked = crate::manifest::Manifest::generate(
            root,
            ManifestFormat::Sha256New,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(fed.serialize(), walked.serialize());
    }

    #[test]
    fn feeder_applies_subdir_selection() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/tool"), "#!").unwrap();
        fs::write(dir.path().join("stray"), "s").unwrap();

        let root = Utf8Path::from_path(dir.path()).unwrap();
        let subdir = RelativePath::new("bin").unwrap();
        let mut builder = ManifestBuilder::new(ManifestFormat::Sha256New);
        feed_directory(&mut builder, root, Some(&subdir), &CancellationToken::new()).unwrap();
        builder.finish().unwrap();
        let text = builder.into_manifest().serialize();
        assert!(text.contains(" tool\n"));
        assert!(!text.contains("stray"));
    }
}
