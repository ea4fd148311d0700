//! Windows-only extractors: cabinet archives and MSI installer databases.
//!
//! An MSI is a COM structured-storage database; the payload lives in
//! embedded cabinets whose member names are keys into the `File` table.
//! Extraction therefore reconstructs the logical directory layout from the
//! `Directory`/`Component`/`File` tables first, then extracts the cabinets
//! named by `Media` (or found in `_Streams`), mapping each member through
//! the table lookup.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Seek};

use super::{mime, ArchiveSource, OffsetReader};
use crate::builder::{Builder, RelativePath};
use crate::errors::{StoreError, StoreResult};
use crate::task::CancellationToken;

pub(super) fn extract_cab(
    source: &ArchiveSource,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let file = fs::File::open(&source.path)?;
    let reader = OffsetReader::new(file, source.start_offset)?;
    extract_cabinet(mime::CAB, reader, builder, subdir, token, &HashMap::new())
}

/// Extract a cabinet stream. When `rename` is non-empty (the MSI case),
/// member names are translated through it and unmatched members skipped.
fn extract_cabinet<R: Read + Seek>(
    mime_type: &str,
    reader: R,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
    rename: &HashMap<String, String>,
) -> StoreResult<()> {
    let mut cabinet =
        cab::Cabinet::new(reader).map_err(|err| StoreError::damaged(mime_type, err))?;

    let mut members: Vec<(String, i64)> = Vec::new();
    for folder in cabinet.folder_entries() {
        for entry in folder.file_entries() {
            let mtime = entry
                .datetime()
                .map(|dt| dt.assume_utc().unix_timestamp())
                .unwrap_or(0);
            members.push((entry.name().to_owned(), mtime));
        }
    }

    for (member, mtime) in members {
        token.check()?;
        let logical = if rename.is_empty() {
            member.clone()
        } else {
            match rename.get(&member) {
                Some(path) => path.clone(),
                // streams can carry more members than the File table names
                None => continue,
            }
        };
        let Some(path) = RelativePath::from_archive_entry(&logical, subdir)? else {
            continue;
        };
        let mut reader = cabinet
            .read_file(&member)
            .map_err(|err| StoreError::damaged(mime_type, err))?;
        builder.add_file(&path, &mut reader, mtime, false)?;
    }
    Ok(())
}

pub(super) fn extract_msi(
    source: &ArchiveSource,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let mime_type = mime::MSI;
    let mut package = msi::open(source.path.as_std_path())
        .map_err(|err| StoreError::damaged(mime_type, err))?;

    // Directory table: key -> (parent key, long name)
    let mut directories: HashMap<String, (String, String)> = HashMap::new();
    let rows = package
        .select_rows(msi::Select::table("Directory"))
        .map_err(|err| StoreError::damaged(mime_type, err))?;
    for row in rows {
        let key = string_cell(&row[0]);
        let parent = string_cell(&row[1]);
        let name = long_name(&string_cell(&row[2]));
        directories.insert(key, (parent, name));
    }

    // Component table: component key -> directory key
    let mut components: HashMap<String, String> = HashMap::new();
    let rows = package
        .select_rows(msi::Select::table("Component"))
        .map_err(|err| StoreError::damaged(mime_type, err))?;
    for row in rows {
        components.insert(string_cell(&row[0]), string_cell(&row[2]));
    }

    // File table: cab member key -> full logical path
    let mut layout: HashMap<String, String> = HashMap::new();
    let rows = package
        .select_rows(msi::Select::table("File"))
        .map_err(|err| StoreError::damaged(mime_type, err))?;
    for row in rows {
        let file_key = string_cell(&row[0]);
        let component = string_cell(&row[1]);
        let file_name = long_name(&string_cell(&row[2]));
        let dir_key = components.get(&component).cloned().unwrap_or_default();
        let dir_path = resolve_directory(&directories, &dir_key);
        let full = if dir_path.is_empty() {
            file_name
        } else {
            format!("{dir_path}/{file_name}")
        };
        layout.insert(file_key, full);
    }

    // Media table names the embedded cabinets ('#' = stored as a stream)
    let mut cabinets: Vec<String> = Vec::new();
    let rows = package
        .select_rows(msi::Select::table("Media"))
        .map_err(|err| StoreError::damaged(mime_type, err))?;
    for row in rows {
        let cabinet = string_cell(&row[3]);
        if let Some(stream) = cabinet.strip_prefix('#') {
            cabinets.push(stream.to_owned());
        }
    }

    for stream_name in cabinets {
        token.check()?;
        let mut stream = package
            .read_stream(&stream_name)
            .map_err(|err| StoreError::damaged(mime_type, err))?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        extract_cabinet(
            mime_type,
            Cursor::new(bytes),
            builder,
            subdir,
            token,
            &layout,
        )?;
    }
    Ok(())
}

fn string_cell(value: &msi::Value) -> String {
    value.as_str().unwrap_or_default().to_owned()
}

/// MSI file names come as `short|long`; prefer the long half.
fn long_name(raw: &str) -> String {
    match raw.split_once('|') {
        Some((_, long)) => long.to_owned(),
        None => raw.to_owned(),
    }
}

/// Walk the Directory table up to the root, accumulating path components.
/// `TARGETDIR`/`SourceDir` and `.` entries contribute nothing.
fn resolve_directory(
    directories: &HashMap<String, (String, String)>,
    key: &str,
) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut current = key;
    let mut hops = 0;
    while let Some((parent, name)) = directories.get(current) {
        hops += 1;
        if hops > 64 {
            break; // cycle in a malformed table
        }
        if name != "." && name != "SourceDir" && current != "TARGETDIR" {
            parts.push(name);
        }
        if parent.is_empty() || parent == current {
            break;
        }
        current = parent;
    }
    parts.reverse();
    parts.join("/")
}
