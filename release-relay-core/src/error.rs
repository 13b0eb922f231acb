//! Error taxonomy for the transfer engine.
//!
//! Every fallible operation in the core returns a [`RelayError`]. The variants
//! are the only distinction the coordinator branches on: it never inspects
//! messages, only kinds.

use serde::Serialize;
use thiserror::Error;

/// Plain tag for a [`RelayError`] variant, reported to callers in a
/// [`crate::contract::TransferOutcome::Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    SourceUnavailable,
    SourceInterrupted,
    BucketResolutionFailed,
    TransportError,
    NameConflict,
    Rejected,
    ConflictUnresolved,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::SourceInterrupted => "SourceInterrupted",
            ErrorKind::BucketResolutionFailed => "BucketResolutionFailed",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::NameConflict => "NameConflict",
            ErrorKind::Rejected => "Rejected",
            ErrorKind::ConflictUnresolved => "ConflictUnresolved",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The source handshake failed (bad reference, source-side 4xx).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source byte stream closed before its end.
    #[error("source interrupted: {0}")]
    SourceInterrupted(String),

    #[error("bucket resolution failed: {0}")]
    BucketResolutionFailed(String),

    /// Network failure or 5xx from either side.
    #[error("transport error: {0}")]
    Transport(String),

    /// The sink already holds an object (or bucket) under this name.
    #[error("name conflict: {0}")]
    NameConflict(String),

    /// Authorization or validation failure; never retried.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("conflict unresolved: {0}")]
    ConflictUnresolved(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            RelayError::SourceInterrupted(_) => ErrorKind::SourceInterrupted,
            RelayError::BucketResolutionFailed(_) => ErrorKind::BucketResolutionFailed,
            RelayError::Transport(_) => ErrorKind::TransportError,
            RelayError::NameConflict(_) => ErrorKind::NameConflict,
            RelayError::Rejected(_) => ErrorKind::Rejected,
            RelayError::ConflictUnresolved(_) => ErrorKind::ConflictUnresolved,
        }
    }

    /// Only transport failures and interrupted source streams are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Transport(_) | RelayError::SourceInterrupted(_)
        )
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            RelayError::SourceUnavailable(m)
            | RelayError::SourceInterrupted(m)
            | RelayError::BucketResolutionFailed(m)
            | RelayError::Transport(m)
            | RelayError::NameConflict(m)
            | RelayError::Rejected(m)
            | RelayError::ConflictUnresolved(m) => m,
        }
    }
}
