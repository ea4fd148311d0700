//! Zip extraction: unix attributes, symlink entries, extended timestamps.

use std::io::{Read, Seek};

use zip::read::ZipArchive;

use super::mime;
use crate::builder::{Builder, RelativePath};
use crate::errors::{StoreError, StoreResult};
use crate::task::CancellationToken;

pub(super) fn extract_zip<R: Read + Seek>(
    reader: R,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let mime_type = mime::ZIP;
    let mut archive =
        ZipArchive::new(reader).map_err(|err| StoreError::damaged(mime_type, err))?;

    for index in 0..archive.len() {
        token.check()?;
        let mut entry = archive
            .by_index(index)
            .map_err(|err| StoreError::damaged(mime_type, err))?;
        let raw_name = entry.name().to_owned();
        let Some(path) = RelativePath::from_archive_entry(&raw_name, subdir)? else {
            continue;
        };

        // prefer the 1-second-accurate extended-timestamp extra field
        // over DOS time
        let mut mtime = None;
        for field in entry.extra_data_fields() {
            if let zip::extra_fields::ExtraField::ExtendedTimestamp(ts) = field {
                if let Some(seconds) = ts.mod_time() {
                    mtime = Some(i64::from(seconds));
                }
            }
        }
        let mtime = mtime.or_else(|| entry.last_modified().map(dos_to_unix));

        if entry.is_dir() {
            builder.add_directory(&path, mtime)?;
            continue;
        }

        let mode = entry.unix_mode();
        if mode.map(|m| m & 0o170000 == 0o120000).unwrap_or(false) {
            // unix symlink bit: the entry's contents are the link target
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|err| StoreError::damaged(mime_type, err))?;
            builder.add_symlink(&path, &target)?;
            continue;
        }

        let executable = mode.map(|m| m & 0o111 != 0).unwrap_or(false);
        builder.add_file(&path, &mut entry, mtime.unwrap_or(0), executable)?;
    }
    Ok(())
}

/// DOS timestamps store local wall-clock fields; render them as UTC the way
/// every other zip consumer does.
fn dos_to_unix(dt: zip::DateTime) -> i64 {
    let days = days_from_civil(
        i64::from(dt.year()),
        i64::from(dt.month()),
        i64::from(dt.day()),
    );
    days * 86_400
        + i64::from(dt.hour()) * 3_600
        + i64::from(dt.minute()) * 60
        + i64::from(dt.second())
}

// Howard Hinnant's days_from_civil, the standard branchless calendar count.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ManifestBuilder;
    use crate::manifest::ManifestFormat;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn sample_zip(entries: &[(&str, &[u8], Option<u32>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, mode) in entries {
            let mut options = SimpleFileOptions::default();
            if let Some(mode) = mode {
                options = options.unix_permissions(*mode);
            }
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn extract_to_manifest(bytes: Vec<u8>, subdir: Option<&str>) -> String {
        let mut target = ManifestBuilder::new(ManifestFormat::Sha256New);
        let subdir = subdir.map(|s| RelativePath::new(s).unwrap());
        extract_zip(
            Cursor::new(bytes),
            &mut target,
            subdir.as_ref(),
            &CancellationToken::new(),
        )
        .unwrap();
        target.finish().unwrap();
        target.into_manifest().serialize()
    }

    #[test]
    fn unix_mode_drives_the_executable_bit() {
        let bytes = sample_zip(&[
            ("plain", b"p", Some(0o644)),
            ("tool", b"t", Some(0o755)),
        ]);
        let text = extract_to_manifest(bytes, None);
        assert!(text.contains("file "));
        assert!(text.contains("executable "));
    }

    #[test]
    fn subdir_selection_applies() {
        let bytes = sample_zip(&[
            ("bin/inside", b"i", Some(0o644)),
            ("outside", b"o", Some(0o644)),
        ]);
        let text = extract_to_manifest(bytes, Some("bin"));
        assert!(text.contains(" inside\n"));
        assert!(!text.contains("outside"));
    }

    #[test]
    fn garbage_is_damaged() {
        let mut target = ManifestBuilder::new(ManifestFormat::Sha256New);
        let result = extract_zip(
            Cursor::new(b"this is not a zip file at all".to_vec()),
            &mut target,
            None,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(StoreError::ArchiveDamaged { .. })));
    }

    #[test]
    fn civil_day_math_matches_known_epochs() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2020, 1, 1), 18262);
        assert_eq!(dos_to_unix(zip::DateTime::default()), 315_532_800); // 1980-01-01
    }
}
