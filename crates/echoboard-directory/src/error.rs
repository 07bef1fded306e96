//! Error taxonomy exposed to the resource/business layer.
//!
//! # Purpose
//! Conflicts and absence are explicit variants so callers are forced to
//! handle slug-taken and version-stale races instead of relying on implicit
//! unwinding. Malformed stored data is an integrity failure and is never
//! recovered from.
use echoboard_kv::BackendError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity does not exist where the operation requires it to.
    #[error("not found: {0}")]
    NotFound(String),
    /// A precondition race: slug already taken, version stale.
    /// Surfaced to the caller, never silently retried here.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Malformed caller input.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    /// Stored data does not decode; fatal, not user-recoverable.
    #[error("integrity: {0}")]
    Integrity(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StoreError {
    /// Wraps a backend failure whose precondition semantics have already
    /// been handled (or do not apply) at the call site.
    pub(crate) fn backend(err: BackendError) -> Self {
        StoreError::Unexpected(err.into())
    }
}
