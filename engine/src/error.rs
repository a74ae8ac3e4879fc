//! Error types for the Flora engine.

use crate::CollectionName;
use thiserror::Error;

/// All possible errors from the offline store.
///
/// The enum is `Clone` because a single in-flight open is shared by every
/// caller that raced to initialize the store, and each of them receives its
/// own copy of the outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Schema drift
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("offline storage unavailable: collection {0} is missing after reinitialization")]
    CollectionUnavailable(CollectionName),

    // Lifecycle
    #[error("offline storage initialization failed: {0}")]
    InitializationFailed(String),

    // Engine
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl Error {
    /// Whether this error means the connection's schema no longer matches
    /// what the code expects. Only these errors trigger a reopen.
    pub fn is_schema_drift(&self) -> bool {
        matches!(self, Error::CollectionNotFound(_))
    }

    /// Whether callers should present this as "offline storage unavailable"
    /// rather than as an ordinary failed read or write.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::CollectionUnavailable(_) | Error::InitializationFailed(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidRecord(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::CollectionNotFound("sync-queue".into());
        assert_eq!(err.to_string(), "collection not found: sync-queue");

        let err = Error::InitializationFailed("disk full".into());
        assert_eq!(
            err.to_string(),
            "offline storage initialization failed: disk full"
        );
    }

    #[test]
    fn only_missing_collections_count_as_drift() {
        assert!(Error::CollectionNotFound("farmers-cache".into()).is_schema_drift());
        assert!(!Error::Storage("io".into()).is_schema_drift());
        assert!(!Error::CollectionUnavailable("farmers-cache".into()).is_schema_drift());
    }

    #[test]
    fn unavailable_classification() {
        assert!(Error::CollectionUnavailable("sync-queue".into()).is_unavailable());
        assert!(Error::InitializationFailed("x".into()).is_unavailable());
        assert!(!Error::Storage("x".into()).is_unavailable());
        assert!(!Error::CollectionNotFound("x".into()).is_unavailable());
    }

    #[test]
    fn serde_errors_become_invalid_record() {
        let err: Error = serde_json::from_str::<u32>("\"nope\"")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }
}
