//! The three manifest formats: hash primitive and digest rendering.

use std::io::Read;

use data_encoding::{BASE32_NOPAD, HEXLOWER};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::errors::{StoreError, StoreResult};

/// A manifest format, identified by the algorithm prefix of a digest id.
///
/// All three formats share the same line grammar; they differ in the hash
/// primitive and in how the whole-manifest digest is rendered (`sha1new`
/// and `sha256` use lowercase hex, `sha256new` unpadded base32). Per-file
/// hashes inside the manifest are lowercase hex in every format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestFormat {
    /// SHA-1, hex digest
    Sha1New,
    /// SHA-256, hex digest
    Sha256,
    /// SHA-256, base32 digest
    Sha256New,
}

impl ManifestFormat {
    /// All formats, strongest first.
    pub const ALL: &'static [ManifestFormat] = &[
        ManifestFormat::Sha256New,
        ManifestFormat::Sha256,
        ManifestFormat::Sha1New,
    ];

    /// The algorithm prefix used in digest ids and store directory names.
    pub fn prefix(self) -> &'static str {
        match self {
            ManifestFormat::Sha1New => "sha1new",
            ManifestFormat::Sha256 => "sha256",
            ManifestFormat::Sha256New => "sha256new",
        }
    }

    /// Look up a format by its algorithm prefix.
    pub fn from_prefix(prefix: &str) -> Option<ManifestFormat> {
        ManifestFormat::ALL
            .iter()
            .copied()
            .find(|f| f.prefix() == prefix)
    }

    /// Split a `<algorithm>_<value>` digest id into its format and value.
    pub fn from_digest_id(id: &str) -> StoreResult<(ManifestFormat, &str)> {
        let (prefix, value) = id
            .split_once('_')
            .ok_or_else(|| StoreError::invalid(format!("not a digest id: {id:?}")))?;
        let format = Self::from_prefix(prefix).ok_or_else(|| {
            StoreError::invalid(format!("unknown manifest algorithm: {prefix:?}"))
        })?;
        Ok((format, value))
    }

    /// Whether this format limits timestamps to unsigned 32 bits.
    pub fn requires_u32_mtime(self) -> bool {
        matches!(self, ManifestFormat::Sha1New)
    }

    pub(crate) fn hasher(self) -> ManifestHasher {
        match self {
            ManifestFormat::Sha1New => ManifestHasher::Sha1(Sha1::new()),
            ManifestFormat::Sha256 | ManifestFormat::Sha256New => {
                ManifestHasher::Sha256(Sha256::new())
            }
        }
    }

    /// Hash a content stream the way per-file hashes are computed: the
    /// format's primitive, rendered lowercase hex. Returns the hash and the
    /// number of bytes read.
    pub fn hash_contents(self, reader: &mut dyn Read) -> std::io::Result<(String, u64)> {
        let mut hasher = self.hasher();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok((HEXLOWER.encode(&hasher.finish()), size))
    }

    /// Render a raw whole-manifest hash the way this format's digest ids do.
    pub fn render_digest(self, raw: &[u8]) -> String {
        match self {
            ManifestFormat::Sha1New | ManifestFormat::Sha256 => HEXLOWER.encode(raw),
            ManifestFormat::Sha256New => BASE32_NOPAD.encode(raw),
        }
    }

    /// Digest a serialized manifest.
    pub fn digest_manifest(self, text: &str) -> String {
        let mut hasher = self.hasher();
        hasher.update(text.as_bytes());
        self.render_digest(&hasher.finish())
    }
}

impl std::fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

pub(crate) enum ManifestHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl ManifestHasher {
    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            ManifestHasher::Sha1(h) => h.update(data),
            ManifestHasher::Sha256(h) => h.update(data),
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        match self {
            ManifestHasher::Sha1(h) => h.finalize().to_vec(),
            ManifestHasher::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_round_trip() {
        for format in ManifestFormat::ALL {
            assert_eq!(ManifestFormat::from_prefix(format.prefix()), Some(*format));
        }
        assert_eq!(ManifestFormat::from_prefix("md5"), None);
    }

    #[test]
    fn splits_digest_ids() {
        let (format, value) = ManifestFormat::from_digest_id("sha256new_ABC").unwrap();
        assert_eq!(format, ManifestFormat::Sha256New);
        assert_eq!(value, "ABC");
        assert!(ManifestFormat::from_digest_id("bogus").is_err());
    }

    #[test]
    fn hashes_known_content() {
        let (hash, size) = ManifestFormat::Sha256New
            .hash_contents(&mut "hi\n".as_bytes())
            .unwrap();
        assert_eq!(
            hash,
            "98ea6e4f216f2fb4b69fff9b3a44842c38686ca685f3f55dc48c5d3fb1107be4"
        );
        assert_eq!(size, 3);
    }
}
