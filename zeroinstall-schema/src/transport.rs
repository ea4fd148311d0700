//! The sync transport container: a ZIP holding exactly `data.xml`,
//! optionally AES-128 encrypted.

use std::io::{Cursor, Read, Write};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

use crate::applist::AppList;
use crate::errors::{Result, SchemaError};

/// Name of the single member inside the container.
const DATA_MEMBER: &str = "data.xml";

/// Pack an app list into the sync container.
pub fn export(list: &AppList, password: Option<&str>) -> Result<Vec<u8>> {
    let xml = list.to_xml()?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    if let Some(password) = password {
        options = options.with_aes_encryption(AesMode::Aes128, password);
    }
    writer.start_file(DATA_MEMBER, options)?;
    writer.write_all(xml.as_bytes())?;
    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

/// Unpack an app list from the sync container.
///
/// An empty payload is treated as an empty list (a fresh server has no
/// state yet). A container without `data.xml` is invalid; a wrong password
/// surfaces as [`SchemaError::CryptoKeyInvalid`].
pub fn import(bytes: &[u8], password: Option<&str>) -> Result<AppList> {
    if bytes.is_empty() {
        return Ok(AppList::default());
    }
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let index = archive
        .index_for_name(DATA_MEMBER)
        .ok_or_else(|| SchemaError::InvalidData {
            message: format!("sync archive has no {DATA_MEMBER} member"),
        })?;
    let mut xml = String::new();
    match password {
        Some(password) => {
            let mut member = archive.by_index_decrypt(index, password.as_bytes())?;
            member
                .read_to_string(&mut xml)
                .map_err(|_| SchemaError::CryptoKeyInvalid)?;
        }
        None => {
            let mut member = match archive.by_index(index) {
                Err(ZipError::UnsupportedArchive(_)) => {
                    // encrypted member opened without a password
                    return Err(SchemaError::CryptoKeyInvalid);
                }
                other => other?,
            };
            member.read_to_string(&mut xml)?;
        }
    }
    AppList::from_xml(&xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applist::AppEntry;

    fn sample() -> AppList {
        let mut list = AppList::default();
        list.entries
            .push(AppEntry::new("https://example.com/app.xml", "App"));
        list
    }

    #[test]
    fn plain_round_trip() {
        let bytes = export(&sample(), None).unwrap();
        let back = import(&bytes, None).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn encrypted_round_trip() {
        let bytes = export(&sample(), Some("hunter2")).unwrap();
        let back = import(&bytes, Some("hunter2")).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn wrong_password_is_a_crypto_error() {
        let bytes = export(&sample(), Some("hunter2")).unwrap();
        assert!(matches!(
            import(&bytes, Some("wrong")),
            Err(SchemaError::CryptoKeyInvalid)
        ));
    }

    #[test]
    fn empty_payload_is_an_empty_list() {
        assert_eq!(import(&[], None).unwrap(), AppList::default());
    }

    #[test]
    fn missing_member_is_invalid() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"nope").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(matches!(
            import(&bytes, None),
            Err(SchemaError::InvalidData { .. })
        ));
    }
}
