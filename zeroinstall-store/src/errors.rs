//! Errors!

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;
use zeroinstall_schema::SchemaError;

/// A Result returned by zeroinstall-store
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// An Error/Diagnostic returned by zeroinstall-store
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum StoreError {
    /// random i/o error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// error from the shared data model
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    /// The requested implementation isn't in any store
    #[error("implementation {digest} not found in the store")]
    NotFound {
        /// The digest we looked for
        digest: String,
    },

    /// Someone tried to add an implementation that already exists
    #[error("implementation {digest} is already in the store")]
    AlreadyInStore {
        /// The digest that already exists
        digest: String,
    },

    /// The extracted contents hash to something other than what the feed
    /// promised
    #[error("digest mismatch: expected {expected}, got {actual}")]
    #[diagnostic(help(
        "the downloaded archive does not match its advertised digest; either the download was corrupted or the feed is wrong"
    ))]
    DigestMismatch {
        /// The digest we were told to expect
        expected: String,
        /// The digest the contents actually have
        actual: String,
        /// The manifest the feed promised, when known
        expected_manifest: Option<String>,
        /// The manifest we computed
        actual_manifest: String,
    },

    /// The archive decoder reported corruption or truncation
    #[error("damaged {mime_type} archive")]
    ArchiveDamaged {
        /// MIME type of the archive being decoded
        mime_type: String,
        /// The underlying decoder error
        #[source]
        details: Box<dyn std::error::Error + Send + Sync>,
    },

    /// We have no extractor for this MIME type
    #[error("no extractor registered for MIME type {mime_type}")]
    UnsupportedFormat {
        /// The MIME type nobody claimed
        mime_type: String,
    },

    /// A manifest line didn't match the format's grammar
    #[error("malformed manifest line: {line:?}")]
    ManifestFormat {
        /// The offending line
        line: String,
    },

    /// Parsing or validation failed
    #[error("invalid data: {message}")]
    InvalidData {
        /// What was wrong
        message: String,
    },

    /// The store's filesystem rounds timestamps too coarsely to be usable
    #[error("filesystem at {path} cannot store timestamps with 1-second accuracy")]
    #[diagnostic(help(
        "manifest digests include modification times; place the store on a filesystem with at least 1-second timestamps"
    ))]
    InsufficientTimeAccuracy {
        /// Root of the offending filesystem
        path: Utf8PathBuf,
    },

    /// The user (or a timeout) cancelled the operation
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Wrap a decoder error as [`StoreError::ArchiveDamaged`].
    pub fn damaged(
        mime_type: &str,
        details: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::ArchiveDamaged {
            mime_type: mime_type.to_owned(),
            details: details.into(),
        }
    }

    /// Shorthand for an [`StoreError::InvalidData`] with a formatted message.
    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidData {
            message: message.into(),
        }
    }
}
