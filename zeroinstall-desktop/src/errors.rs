//! Errors!

use miette::Diagnostic;
use thiserror::Error;
use zeroinstall_schema::SchemaError;
use zeroinstall_store::StoreError;

/// A Result returned by zeroinstall-desktop
pub type DesktopResult<T> = std::result::Result<T, DesktopError>;

/// Which side of a conflict check tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A proposed access point collides with an already-integrated one
    New,
    /// Two proposed access points collide with each other
    Inner,
    /// The existing app list already contains colliding access points
    Existing,
}

/// One party to a conflict, named for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictItem {
    /// The contested id (e.g. `file-ext:.txt`)
    pub conflict_id: String,
    /// Interface URI of the app claiming it
    pub interface_uri: String,
    /// XML tag of the claiming access point
    pub access_point: String,
}

impl std::fmt::Display for ConflictItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} via <{}> of {}",
            self.conflict_id, self.access_point, self.interface_uri
        )
    }
}

/// An Error/Diagnostic returned by zeroinstall-desktop
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum DesktopError {
    /// random i/o error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// error from the shared data model
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(SchemaError),

    /// error from the implementation store
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(StoreError),

    /// The app (or other object) isn't in the list
    #[error("{what} not found")]
    NotFound {
        /// What we looked for
        what: String,
    },

    /// Parsing or validation failed
    #[error("invalid data: {message}")]
    InvalidData {
        /// What was wrong
        message: String,
    },

    /// Access points compete over the same conflict ids
    #[error("conflicting access points ({kind:?}): {}", entries.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    #[diagnostic(help(
        "two applications can't claim the same menu entry, alias or file association; remove one of them first"
    ))]
    Conflict {
        /// Where the collision was found
        kind: ConflictKind,
        /// Every party involved, in deterministic order
        entries: Vec<ConflictItem>,
    },

    /// Another process already runs an integration manager
    #[error("another desktop-integration process is already active")]
    #[diagnostic(help("wait for the other Zero Install instance to finish"))]
    AnotherInstanceActive,

    /// The sync payload couldn't be decrypted with the configured key
    #[error("wrong crypto key for the sync server payload")]
    CryptoKeyInvalid,

    /// The sync server rejected our credentials
    #[error("sync server rejected the credentials")]
    CredentialsInvalid,

    /// Another client raced our upload and won, repeatedly
    #[error("sync conflict: the server state kept changing under us")]
    #[diagnostic(help("another machine is syncing at the same time; try again later"))]
    SyncRace,

    /// A machine-wide mutation was attempted without the rights for it
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// What was attempted
        message: String,
    },

    /// The user (or a timeout) cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// A network transfer failed
    #[error("network failure talking to {context}")]
    Network {
        /// What we were talking to
        context: String,
        /// The underlying transport error
        #[source]
        details: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl From<SchemaError> for DesktopError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::CryptoKeyInvalid => DesktopError::CryptoKeyInvalid,
            other => DesktopError::Schema(other),
        }
    }
}

impl From<StoreError> for DesktopError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => DesktopError::Cancelled,
            other => DesktopError::Store(other),
        }
    }
}

impl DesktopError {
    /// Shorthand for [`DesktopError::InvalidData`] with a formatted message.
    pub fn invalid(message: impl Into<String>) -> Self {
        DesktopError::InvalidData {
            message: message.into(),
        }
    }

    pub(crate) fn network(
        context: impl Into<String>,
        details: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        DesktopError::Network {
            context: context.into(),
            details: details.into(),
        }
    }
}
