//! Errors!

use miette::Diagnostic;
use thiserror::Error;

/// A Result returned by zeroinstall-schema
pub type Result<T> = std::result::Result<T, SchemaError>;

/// An Error/Diagnostic returned by zeroinstall-schema
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum SchemaError {
    /// random i/o error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The XML could not be parsed at all
    #[error("malformed XML")]
    Xml {
        /// The underlying parser error
        #[source]
        details: quick_xml::Error,
    },

    /// The XML parsed but doesn't describe a valid app list
    #[error("invalid app list data: {message}")]
    InvalidData {
        /// What was wrong with it
        message: String,
    },

    /// An encrypted app list was opened with the wrong password
    #[error("wrong password for encrypted app list")]
    #[diagnostic(help("the crypto key must match the one the list was exported with"))]
    CryptoKeyInvalid,

    /// The ZIP container of a sync payload couldn't be read
    #[error("app list archive is damaged")]
    Zip {
        /// The underlying zip error
        #[source]
        details: zip::result::ZipError,
    },

    /// A digest string didn't have a recognizable `<algorithm>_<value>` shape
    #[error("not a valid manifest digest: {id}")]
    #[diagnostic(help(
        "supported algorithm prefixes are sha1new, sha256 and sha256new"
    ))]
    BadDigest {
        /// The string we failed to parse
        id: String,
    },
}

impl From<quick_xml::Error> for SchemaError {
    fn from(details: quick_xml::Error) -> Self {
        SchemaError::Xml { details }
    }
}

impl From<quick_xml::events::attributes::AttrError> for SchemaError {
    fn from(details: quick_xml::events::attributes::AttrError) -> Self {
        SchemaError::InvalidData {
            message: format!("bad attribute syntax: {details}"),
        }
    }
}

impl From<zip::result::ZipError> for SchemaError {
    fn from(details: zip::result::ZipError) -> Self {
        match details {
            zip::result::ZipError::InvalidPassword => SchemaError::CryptoKeyInvalid,
            other => SchemaError::Zip { details: other },
        }
    }
}
