//! Centralized error types for mboxquery.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mboxquery library.
#[derive(Error, Debug)]
pub enum MboxError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive does not exist.
    #[error("MBOX archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    /// The index file is corrupt or was built with an incompatible version.
    #[error("Corrupt or incompatible index for '{path}': {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    /// The archive changed since the index was built. Recovered by rebuilding.
    #[error("Index is stale: {reason}")]
    StaleIndex { reason: String },

    /// A record could not be split into headers and body.
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    /// No index entry carries the requested id.
    #[error("No message with id {0}")]
    EntryNotFound(u64),

    /// The requested attachment ordinal does not exist in the message.
    #[error("Message {id} has {count} attachment(s); ordinal {ordinal} is out of range")]
    AttachmentOrdinalOutOfRange { id: u64, ordinal: usize, count: usize },

    /// The attachment payload could not be decoded.
    #[error("Cannot decode attachment {ordinal}: {reason}")]
    AttachmentDecodeError { ordinal: usize, reason: String },

    /// A filter value supplied by the caller could not be interpreted.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

/// Convenience alias for `Result<T, MboxError>`.
pub type Result<T> = std::result::Result<T, MboxError>;

impl MboxError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map an `io::Error` raised while opening `path`, turning `NotFound` into
    /// [`MboxError::ArchiveNotFound`].
    pub fn open_archive(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::ArchiveNotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare; prefer `MboxError::io`).
impl From<std::io::Error> for MboxError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
