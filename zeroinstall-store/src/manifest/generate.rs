//! Deterministic directory walk producing manifest entries.

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;

use camino::Utf8Path;

use super::{ManifestEntry, ManifestFormat, MANIFEST_FILE, SYMLINK_FILE, XBIT_FILE};
use crate::errors::{StoreError, StoreResult};
use crate::task::CancellationToken;

/// The `.xbit` / `.symlink` flag files carrying POSIX metadata on
/// filesystems that can't.
#[derive(Debug, Default)]
pub(crate) struct FlagFiles {
    pub(crate) executable: BTreeSet<String>,
    pub(crate) symlink: BTreeSet<String>,
}

impl FlagFiles {
    pub(crate) fn load(root: &Utf8Path) -> StoreResult<FlagFiles> {
        Ok(FlagFiles {
            executable: Self::load_one(&root.join(XBIT_FILE))?,
            symlink: Self::load_one(&root.join(SYMLINK_FILE))?,
        })
    }

    fn load_one(path: &Utf8Path) -> StoreResult<BTreeSet<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(text
                .lines()
                .map(|line| line.trim_start_matches('/').to_owned())
                .filter(|line| !line.is_empty())
                .collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(err) => Err(err.into()),
        }
    }
}

pub(super) fn generate(
    root: &Utf8Path,
    format: ManifestFormat,
    token: &CancellationToken,
) -> StoreResult<super::Manifest> {
    let flags = FlagFiles::load(root)?;
    let mut entries = Vec::new();
    walk(root, "", &flags, format, token, &mut entries)?;
    Ok(super::Manifest::from_entries(format, entries))
}

fn walk(
    dir: &Utf8Path,
    rel: &str,
    flags: &FlagFiles,
    format: ManifestFormat,
    token: &CancellationToken,
    out: &mut Vec<ManifestEntry>,
) -> StoreResult<()> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let name = item.file_name();
        let name = name.to_str().ok_or_else(|| {
            StoreError::invalid(format!("non-UTF-8 file name in {dir}: {name:?}"))
        })?;
        if rel.is_empty() && matches!(name, MANIFEST_FILE | XBIT_FILE | SYMLINK_FILE) {
            continue;
        }
        if name.contains('\n') {
            return Err(StoreError::invalid(format!(
                "file name in {dir} contains a newline"
            )));
        }
        let meta = item.metadata()?;
        if meta.is_dir() && !item.file_type()?.is_symlink() {
            dirs.push(name.to_owned());
        } else {
            files.push(name.to_owned());
        }
    }
    files.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    dirs.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

    for name in files {
        token.check()?;
        let path = dir.join(&name);
        let child_rel = join_rel(rel, &name);
        out.push(file_entry(&path, &name, &child_rel, flags, format)?);
    }
    for name in dirs {
        token.check()?;
        let path = dir.join(&name);
        let child_rel = join_rel(rel, &name);
        out.push(ManifestEntry::Dir {
            path: format!("/{child_rel}"),
        });
        walk(&path, &child_rel, flags, format, token, out)?;
    }
    Ok(())
}

fn join_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_owned()
    } else {
        format!("{rel}/{name}")
    }
}

fn file_entry(
    path: &Utf8Path,
    name: &str,
    rel: &str,
    flags: &FlagFiles,
    format: ManifestFormat,
) -> StoreResult<ManifestEntry> {
    let meta = fs::symlink_metadata(path)?;

    if meta.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        let target = target.to_str().ok_or_else(|| {
            StoreError::invalid(format!("symlink {path} has a non-UTF-8 target"))
        })?;
        let (hash, size) = format.hash_contents(&mut target.as_bytes())?;
        return Ok(ManifestEntry::Symlink {
            hash,
            size,
            name: name.to_owned(),
        });
    }

    if flags.symlink.contains(rel) {
        // the file's contents are the link target
        let mut file = fs::File::open(path)?;
        let mut target = Vec::new();
        file.read_to_end(&mut target)?;
        let (hash, size) = format.hash_contents(&mut target.as_slice())?;
        return Ok(ManifestEntry::Symlink {
            hash,
            size,
            name: name.to_owned(),
        });
    }

    let mtime = filetime::FileTime::from_last_modification_time(&meta).unix_seconds();
    if format.requires_u32_mtime() && u32::try_from(mtime).is_err() {
        return Err(StoreError::invalid(format!(
            "modification time {mtime} of {path} does not fit the {format} format"
        )));
    }
    let mut file = fs::File::open(path)?;
    let (hash, size) = format.hash_contents(&mut file)?;
    Ok(ManifestEntry::File {
        executable: is_executable(&meta) || flags.executable.contains(rel),
        hash,
        mtime,
        size,
        name: name.to_owned(),
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
    use super::super::{Manifest, ManifestFormat};
    use crate::task::CancellationToken;
    use camino::Utf8PathBuf;
    use std::fs;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    fn touch(path: &std::path::Path, contents: &str, mtime: i64) {
        fs::write(path, contents).unwrap();
        filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    #[test]
    fn walk_is_deterministic_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path());
        touch(&dir.path().join("zeta"), "z", 100);
        touch(&dir.path().join("alpha"), "a", 100);
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/inner"), "i", 100);

        let token = CancellationToken::new();
        let manifest = Manifest::generate(&root, ManifestFormat::Sha256New, &token).unwrap();
        let text = manifest.serialize();
        let names: Vec<&str> = text
            .lines()
            .map(|l| l.rsplit(' ').next().unwrap())
            .collect();
        // files sorted first, then subdirectories with their contents
        assert_eq!(names, vec!["alpha", "zeta", "/sub", "inner"]);

        // a fresh identical tree digests identically
        let clone = tempfile::tempdir().unwrap();
        touch(&clone.path().join("zeta"), "z", 100);
        touch(&clone.path().join("alpha"), "a", 100);
        fs::create_dir(clone.path().join("sub")).unwrap();
        touch(&clone.path().join("sub/inner"), "i", 100);
        let again =
            Manifest::generate(&utf8(clone.path()), ManifestFormat::Sha256New, &token).unwrap();
        assert_eq!(manifest.digest_id(), again.digest_id());
    }

    #[test]
    fn top_level_metadata_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".manifest"), "old", 100);
        touch(&dir.path().join("real"), "data", 100);
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/.manifest"), "not special here", 100);

        let manifest = Manifest::generate(
            &utf8(dir.path()),
            ManifestFormat::Sha256New,
            &CancellationToken::new(),
        )
        .unwrap();
        let text = manifest.serialize();
        assert!(!text.contains("old"));
        assert!(text.contains("real"));
        // nested .manifest files are ordinary content
        assert!(text.lines().any(|l| l.ends_with(" .manifest")));
    }

    #[test]
    fn xbit_flag_marks_executables() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("tool"), "#!", 100);
        fs::write(dir.path().join(".xbit"), "/tool\n").unwrap();

        let manifest = Manifest::generate(
            &utf8(dir.path()),
            ManifestFormat::Sha256New,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(manifest.serialize().starts_with("executable "));
    }

    #[test]
    fn sha1new_rejects_timestamps_beyond_u32() {
        let dir = tempfile::tempdir().unwrap();
        // first second after the 32-bit range ends in 2106
        touch(&dir.path().join("relic"), "x", i64::from(u32::MAX) + 1);

        let err = Manifest::generate(
            &utf8(dir.path()),
            ManifestFormat::Sha1New,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::StoreError::InvalidData { .. }
        ));

        // the wider formats take the same tree without complaint
        Manifest::generate(
            &utf8(dir.path()),
            ManifestFormat::Sha256New,
            &CancellationToken::new(),
        )
        .unwrap();
    }

    #[test]
    fn cancellation_stops_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a"), "a", 100);
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            Manifest::generate(&utf8(dir.path()), ManifestFormat::Sha256New, &token),
            Err(crate::errors::StoreError::Cancelled)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_hash_their_target() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("target-path", dir.path().join("link")).unwrap();
        let manifest = Manifest::generate(
            &utf8(dir.path()),
            ManifestFormat::Sha256New,
            &CancellationToken::new(),
        )
        .unwrap();
        let text = manifest.serialize();
        assert!(text.starts_with("symlink "));
        assert!(text.contains(" 11 link"));
    }
}
