//! Error types for the store and its backends.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a revisioned document backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No live document exists for the identifier.
    #[error("missing")]
    NotFound,
    /// The expected revision does not match the stored one.
    #[error("Document update conflict")]
    Conflict,
    /// The document is malformed (e.g. missing `_id` on update).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// SQLite failure.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
    /// Schema migration failure.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    /// Document body could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Remote peer returned an error or could not be reached.
    #[error("HTTP error: {0}")]
    Http(String),
    /// I/O error preparing the database location.
    #[error("I/O error for {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Http(err.to_string())
    }
}

/// Per-entry failure reported by a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{id}: {reason}")]
pub struct BulkError {
    pub id: String,
    pub reason: BulkErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BulkErrorKind {
    #[error("missing")]
    NotFound,
    #[error("Document update conflict")]
    Conflict,
    #[error("Invalid document: {0}")]
    Invalid(String),
}

/// Errors surfaced by [`crate::Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Required input was absent or of the wrong shape.
    #[error("{0}")]
    InvalidArgument(&'static str),
    /// No document exists at the identifier.
    #[error("missing")]
    NotFound,
    /// The write carried a stale revision.
    #[error("Document update conflict")]
    Conflict,
    /// Storage or transport fault inside the backend.
    #[error(transparent)]
    Backend(BackendError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound => StoreError::NotFound,
            BackendError::Conflict => StoreError::Conflict,
            other => StoreError::Backend(other),
        }
    }
}

impl From<BulkErrorKind> for BackendError {
    fn from(kind: BulkErrorKind) -> Self {
        match kind {
            BulkErrorKind::NotFound => BackendError::NotFound,
            BulkErrorKind::Conflict => BackendError::Conflict,
            BulkErrorKind::Invalid(msg) => BackendError::InvalidDocument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_is_missing() {
        let err: StoreError = BackendError::NotFound.into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "missing");
    }

    #[test]
    fn test_conflict_maps_to_store_conflict() {
        let err: StoreError = BackendError::Conflict.into();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_other_backend_errors_are_wrapped() {
        let err: StoreError = BackendError::Http("connection refused".to_string()).into();
        assert!(matches!(err, StoreError::Backend(BackendError::Http(_))));
        assert_eq!(err.to_string(), "HTTP error: connection refused");
    }

    #[test]
    fn test_invalid_argument_message() {
        let err = StoreError::InvalidArgument("Invalid object");
        assert_eq!(err.to_string(), "Invalid object");
    }
}
