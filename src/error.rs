//! Error types for the spandb metadata layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetaError>;

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    // Cache misuse is a programmer error and aborts the unit of work
    #[error("Cache {0} is already initialized")]
    AlreadyInitialized(String),

    #[error("Cache {0} is not initialized")]
    UninitializedCache(String),

    #[error("Cache {0} released without a matching pin")]
    RefcountUnderflow(String),

    // User-facing rejections, optionally with a hint
    #[error("{message}")]
    UnsupportedFeature {
        message: String,
        hint: Option<String>,
    },

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Mismatched extension version: installed {installed}, compiled {compiled}")]
    VersionMismatch { installed: String, compiled: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl MetaError {
    /// Build an `UnsupportedFeature` error without a hint.
    pub fn unsupported(message: impl Into<String>) -> Self {
        MetaError::UnsupportedFeature {
            message: message.into(),
            hint: None,
        }
    }

    /// Build an `UnsupportedFeature` error with a hint for the caller.
    pub fn unsupported_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        MetaError::UnsupportedFeature {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}

impl From<bincode::Error> for MetaError {
    fn from(err: bincode::Error) -> Self {
        MetaError::Serialization(err.to_string())
    }
}
