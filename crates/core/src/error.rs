//! Error taxonomy shared by every component (§6/§7 of the design).
//!
//! Three bands: client-visible/recoverable, retryable-transient (folded
//! into `BackendError` once retries are exhausted), and fatal
//! (`IntegrityError`, never auto-healed).

use std::path::PathBuf;
use thiserror::Error;

pub type NexusResult<T> = Result<T, NexusError>;

#[derive(Debug, Error)]
pub enum NexusError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: expected version {expected:?}, found {actual:?}")]
    Conflict { expected: String, actual: String },

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("stale session: agent {agent_id} — {reason}")]
    StaleSession { agent_id: String, reason: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NexusError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NexusError::Io { path: path.into(), source }
    }

    /// Whether this error represents the fatal band (§7.3) that must
    /// never be auto-healed or retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NexusError::Integrity(_))
    }
}
