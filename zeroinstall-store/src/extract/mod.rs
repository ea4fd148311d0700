//! Multi-format archive extraction driving a [`Builder`].
//!
//! Each extractor decodes one archive format and replays it as builder
//! operations in the archive's own order. Overlaying several archives onto
//! one implementation is just invoking the extractors against the same
//! builder back to back; the builder's overwrite semantics make the last
//! archive win.

mod staged;
mod tar;
#[cfg(windows)]
mod windows;
mod zip;

use std::fs;
use std::io::{Read, Seek, SeekFrom};

use camino::Utf8PathBuf;

use crate::builder::{Builder, PrefixedBuilder, RelativePath};
use crate::errors::{StoreError, StoreResult};
use crate::task::TaskHandler;

pub use staged::feed_directory;

/// MIME types this pipeline can decode.
pub mod mime {
    /// Plain tar
    pub const TAR: &str = "application/x-tar";
    /// Gzip-compressed tar
    pub const TAR_GZIP: &str = "application/x-compressed-tar";
    /// Bzip2-compressed tar
    pub const TAR_BZIP2: &str = "application/x-bzip-compressed-tar";
    /// Xz-compressed tar
    pub const TAR_XZ: &str = "application/x-xz-compressed-tar";
    /// Legacy lzma-alone-compressed tar
    pub const TAR_LZMA: &str = "application/x-lzma-compressed-tar";
    /// Lzip-compressed tar
    pub const TAR_LZIP: &str = "application/x-lzip-compressed-tar";
    /// Zstandard-compressed tar
    pub const TAR_ZSTD: &str = "application/x-zstd-compressed-tar";
    /// Zip
    pub const ZIP: &str = "application/zip";
    /// 7-Zip
    pub const SEVEN_ZIP: &str = "application/x-7z-compressed";
    /// RAR
    pub const RAR: &str = "application/vnd.rar";
    /// Ruby gem (tar containing data.tar.gz)
    pub const RUBY_GEM: &str = "application/x-rubygem";
    /// Microsoft cabinet (Windows only)
    pub const CAB: &str = "application/vnd.ms-cab-compressed";
    /// Windows installer database (Windows only)
    pub const MSI: &str = "application/x-msi";
}

const PORTABLE_MIME_TYPES: &[&str] = &[
    mime::TAR,
    mime::TAR_GZIP,
    mime::TAR_BZIP2,
    mime::TAR_XZ,
    mime::TAR_LZMA,
    mime::TAR_LZIP,
    mime::TAR_ZSTD,
    mime::ZIP,
    mime::SEVEN_ZIP,
    mime::RAR,
    mime::RUBY_GEM,
];

const WINDOWS_MIME_TYPES: &[&str] = &[mime::CAB, mime::MSI];

/// Every MIME type [`extract`] accepts on this platform.
pub fn supported_mime_types() -> impl Iterator<Item = &'static str> {
    let windows_only = if cfg!(windows) {
        WINDOWS_MIME_TYPES
    } else {
        &[]
    };
    PORTABLE_MIME_TYPES
        .iter()
        .chain(windows_only.iter())
        .copied()
}

/// Whether [`extract`] can handle this MIME type here.
pub fn supports(mime_type: &str) -> bool {
    supported_mime_types().any(|supported| supported == mime_type)
}

/// One archive to extract, with its placement options.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    /// Where the archive lives on disk
    pub path: Utf8PathBuf,
    /// Declared MIME type; drives extractor selection
    pub mime_type: String,
    /// Only extract entries below this archive-internal directory
    pub extract_subdir: Option<String>,
    /// Place extracted entries below this directory in the target
    pub destination_subdir: Option<String>,
    /// Skip this many leading bytes (self-extracting headers etc.)
    pub start_offset: u64,
    /// Where the archive was downloaded from, for error messages
    pub original_source: Option<String>,
}

impl ArchiveSource {
    /// A plain source with no placement options.
    pub fn new(path: impl Into<Utf8PathBuf>, mime_type: impl Into<String>) -> ArchiveSource {
        ArchiveSource {
            path: path.into(),
            mime_type: mime_type.into(),
            extract_subdir: None,
            destination_subdir: None,
            start_offset: 0,
            original_source: None,
        }
    }
}

/// Extract one archive into a builder.
pub fn extract(
    source: &ArchiveSource,
    builder: &mut dyn Builder,
    handler: &dyn TaskHandler,
) -> StoreResult<()> {
    let token = handler.cancellation();
    token.check()?;
    tracing::info!(
        "extracting {} ({}) into builder",
        source.path,
        source.mime_type
    );

    let subdir = source
        .extract_subdir
        .as_deref()
        .map(RelativePath::new)
        .transpose()?;
    let subdir = subdir.as_ref();

    match source.mime_type.as_str() {
        mime::TAR
        | mime::TAR_GZIP
        | mime::TAR_BZIP2
        | mime::TAR_XZ
        | mime::TAR_LZMA
        | mime::TAR_LZIP
        | mime::TAR_ZSTD => {
            let file = open_at_offset(source)?;
            self::tar::extract_tar(&source.mime_type, file, builder, subdir, token)
        }
        mime::RUBY_GEM => {
            let file = open_at_offset(source)?;
            self::tar::extract_gem(file, builder, subdir, token)
        }
        mime::ZIP => {
            let file = fs::File::open(&source.path)?;
            self::zip::extract_zip(
                OffsetReader::new(file, source.start_offset)?,
                builder,
                subdir,
                token,
            )
        }
        mime::SEVEN_ZIP => staged::extract_7z(source, builder, subdir, token),
        mime::RAR => staged::extract_rar(source, builder, subdir, token),
        #[cfg(windows)]
        mime::CAB => windows::extract_cab(source, builder, subdir, token),
        #[cfg(windows)]
        mime::MSI => windows::extract_msi(source, builder, subdir, token),
        other => Err(StoreError::UnsupportedFormat {
            mime_type: other.to_owned(),
        }),
    }
}

/// Extract several archives as one overlay, in order, then finish the
/// builder. Later archives overwrite earlier ones where they collide.
pub fn extract_all(
    sources: &[ArchiveSource],
    builder: &mut dyn Builder,
    handler: &dyn TaskHandler,
) -> StoreResult<()> {
    for source in sources {
        match source.destination_subdir.as_deref() {
            Some(dest) => {
                let prefix = RelativePath::new(dest)?;
                let mut prefixed = PrefixedBuilder::new(builder, prefix)?;
                extract(source, &mut prefixed, handler)?;
            }
            None => extract(source, builder, handler)?,
        }
    }
    builder.finish()
}

fn open_at_offset(source: &ArchiveSource) -> StoreResult<fs::File> {
    let mut file = fs::File::open(&source.path)?;
    if source.start_offset > 0 {
        file.seek(SeekFrom::Start(source.start_offset))?;
    }
    Ok(file)
}

/// A `Read + Seek` view of a file that treats `base` as position zero.
///
/// Zip archives locate their central directory relative to the end of the
/// stream, so a simple up-front seek isn't enough there.
pub(crate) struct OffsetReader<R> {
    inner: R,
    base: u64,
}

impl<R: Seek> OffsetReader<R> {
    pub(crate) fn new(mut inner: R, base: u64) -> std::io::Result<Self> {
        inner.seek(SeekFrom::Start(base))?;
        Ok(OffsetReader { inner, base })
    }
}

impl<R: Read> Read for OffsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for OffsetReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let effective = match pos {
            SeekFrom::Start(offset) => SeekFrom::Start(self.base + offset),
            relative => relative,
        };
        let absolute = self.inner.seek(effective)?;
        Ok(absolute.saturating_sub(self.base))
    }
}
