use crate::util::DigestInfo;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        expected: DigestInfo,
        actual: DigestInfo,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt entry {digest}: {reason}")]
    Corrupt { digest: DigestInfo, reason: String },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
}

impl StoreError {
    /// Transient failures the caller may retry; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Classifies a local filesystem error. Out-of-space and permission
    /// errors are fatal and keep their original form; the rest are transient.
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::PermissionDenied | ErrorKind::StorageFull => StoreError::Io(err),
            _ => StoreError::Unavailable(format!("{context}: {err}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid storage configuration: {0}")]
    Invalid(String),
}

/// Failure reported by a networked key/value backend.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("backend error: {0}")]
    Fatal(String),
}

impl KvError {
    pub fn is_transient(&self) -> bool {
        matches!(self, KvError::Transient(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
