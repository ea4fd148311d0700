//! Tar extraction, including the compressed variants and ruby gems.

use std::io::{Cursor, Read};

use flate2::read::MultiGzDecoder;
use tar::{Archive, EntryType};
use xz2::read::XzDecoder;
use xz2::stream::Stream;

use super::mime;
use crate::builder::{Builder, RelativePath};
use crate::errors::{StoreError, StoreResult};
use crate::task::CancellationToken;

/// Decode the compression layer (if any) and replay the tar stream.
pub(super) fn extract_tar(
    mime_type: &str,
    file: std::fs::File,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    match mime_type {
        mime::TAR => run_tar(mime_type, file, builder, subdir, token),
        mime::TAR_GZIP => run_tar(mime_type, MultiGzDecoder::new(file), builder, subdir, token),
        mime::TAR_BZIP2 => run_tar(
            mime_type,
            bzip2::read::MultiBzDecoder::new(file),
            builder,
            subdir,
            token,
        ),
        mime::TAR_XZ => run_tar(mime_type, XzDecoder::new(file), builder, subdir, token),
        mime::TAR_LZMA => {
            let stream = Stream::new_lzma_decoder(u64::MAX)
                .map_err(|err| StoreError::damaged(mime_type, format!("{err:?}")))?;
            run_tar(
                mime_type,
                XzDecoder::new_stream(file, stream),
                builder,
                subdir,
                token,
            )
        }
        mime::TAR_LZIP => {
            let decoder = lzip_decoder(mime_type, file)?;
            run_tar(mime_type, decoder, builder, subdir, token)
        }
        mime::TAR_ZSTD => {
            let decoder = zstd::stream::read::Decoder::new(file)
                .map_err(|err| StoreError::damaged(mime_type, err))?;
            run_tar(mime_type, decoder, builder, subdir, token)
        }
        other => Err(StoreError::UnsupportedFormat {
            mime_type: other.to_owned(),
        }),
    }
}

/// A ruby gem is a plain tar whose `data.tar.gz` member holds the payload.
pub(super) fn extract_gem(
    file: std::fs::File,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let mime_type = mime::RUBY_GEM;
    let mut archive = Archive::new(file);
    let entries = archive
        .entries()
        .map_err(|err| StoreError::damaged(mime_type, err))?;
    for entry in entries {
        token.check()?;
        let entry = entry.map_err(|err| StoreError::damaged(mime_type, err))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if name.trim_start_matches("./") == "data.tar.gz" {
            return run_tar(mime_type, MultiGzDecoder::new(entry), builder, subdir, token);
        }
    }
    Err(StoreError::damaged(
        mime_type,
        "gem has no data.tar.gz member",
    ))
}

fn run_tar<R: Read>(
    mime_type: &str,
    reader: R,
    builder: &mut dyn Builder,
    subdir: Option<&RelativePath>,
    token: &CancellationToken,
) -> StoreResult<()> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| StoreError::damaged(mime_type, err))?;
    for entry in entries {
        token.check()?;
        let mut entry = entry.map_err(|err| StoreError::damaged(mime_type, err))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(path) = RelativePath::from_archive_entry(&name, subdir)? else {
            continue;
        };

        let header = entry.header();
        let mtime = header
            .mtime()
            .map_err(|err| StoreError::damaged(mime_type, err))? as i64;
        let executable = header
            .mode()
            .map_err(|err| StoreError::damaged(mime_type, err))?
            & 0o111
            != 0;

        match header.entry_type() {
            EntryType::Directory => builder.add_directory(&path, Some(mtime))?,
            EntryType::Link => {
                let target = entry
                    .link_name_bytes()
                    .ok_or_else(|| StoreError::damaged(mime_type, "hardlink without target"))?;
                let target = String::from_utf8_lossy(&target).into_owned();
                let Some(target) = RelativePath::from_archive_entry(&target, subdir)? else {
                    continue;
                };
                builder.queue_hardlink(&path, &target, executable)?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name_bytes()
                    .ok_or_else(|| StoreError::damaged(mime_type, "symlink without target"))?;
                let target = String::from_utf8_lossy(&target).into_owned();
                builder.add_symlink(&path, &target)?;
            }
            kind if kind.is_file() => {
                builder.add_file(&path, &mut entry, mtime, executable)?;
            }
            // pax headers, fifos, devices: nothing to build
            _ => {}
        }
    }
    Ok(())
}

/// Adapt an lzip member to liblzma's lzma-alone decoder.
///
/// The lzip container is a 6-byte header (`LZIP`, version, coded dictionary
/// size) around a raw LZMA stream with fixed lc=3 lp=0 pb=2 properties and
/// an end-of-stream marker, plus a CRC trailer we never reach. liblzma has
/// no lzip mode, but accepts the identical stream when we synthesize the
/// 13-byte lzma-alone header in front of it.
fn lzip_decoder<R: Read>(
    mime_type: &str,
    mut reader: R,
) -> StoreResult<XzDecoder<std::io::Chain<Cursor<Vec<u8>>, R>>> {
    let mut header = [0u8; 6];
    reader
        .read_exact(&mut header)
        .map_err(|err| StoreError::damaged(mime_type, err))?;
    if &header[0..4] != b"LZIP" || header[4] != 1 {
        return Err(StoreError::damaged(mime_type, "not an lzip version-1 member"));
    }
    let coded = header[5];
    let exponent = coded & 0x1F;
    if !(12..=29).contains(&exponent) {
        return Err(StoreError::damaged(mime_type, "bad lzip dictionary size"));
    }
    let base = 1u32 << exponent;
    let dict_size = base - (base / 16) * u32::from(coded >> 5);

    let mut alone_header = Vec::with_capacity(13);
    alone_header.push(0x5D); // lc=3 lp=0 pb=2, fixed by the lzip format
    alone_header.extend_from_slice(&dict_size.to_le_bytes());
    alone_header.extend_from_slice(&u64::MAX.to_le_bytes()); // size unknown

    let stream = Stream::new_lzma_decoder(u64::MAX)
        .map_err(|err| StoreError::damaged(mime_type, format!("{err:?}")))?;
    Ok(XzDecoder::new_stream(
        Cursor::new(alone_header).chain(reader),
        stream,
    ))
}
