//! Error taxonomy for chapter loading.

use std::io;

use thiserror::Error;

/// Failure reported by a content source collaborator.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0} not found in document")]
    NotFound(String),
    #[error("{what} is malformed: {reason}")]
    Corrupted { what: String, reason: String },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Failure to decode, resize, or re-encode a single embedded resource.
///
/// Always recoverable: the loader falls back to the original bytes.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("unable to decode image: {0}")]
    Decode(String),
    #[error("unable to resize image: {0}")]
    Resize(String),
    #[error("unable to encode image: {0}")]
    Encode(String),
}

/// Chapter-level outcome delivered through the error channel.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content not found: {what}")]
    ContentNotFound { what: String },
    #[error("content corrupted: {what}: {reason}")]
    ContentCorrupted { what: String, reason: String },
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error("cache integrity violated: {detail}")]
    CacheIntegrity { detail: String },
    #[error("request was superseded")]
    Cancelled,
}

impl ContentError {
    /// Classify a content source failure for the item described by `what`.
    pub fn from_source(error: SourceError, what: impl Into<String>) -> Self {
        let what = what.into();
        match error {
            SourceError::NotFound(_) => Self::ContentNotFound { what },
            SourceError::Io(err) if err.kind() == io::ErrorKind::NotFound => {
                Self::ContentNotFound { what }
            }
            SourceError::Corrupted { reason, .. } => Self::ContentCorrupted { what, reason },
            SourceError::Io(err) => Self::ContentCorrupted { what, reason: err.to_string() },
        }
    }

    /// Cancellation is an expected outcome and never reaches the user.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
