//! Error types for Tandem Core

use crate::classify::{ClassifiedError, FailureKind, StoreError};
use crate::store::StoreRole;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the coordinator [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the coordinator to its callers
///
/// Connectivity failures are absorbed whenever a fallback succeeded, so a
/// caller only ever sees one of the variants below.
#[derive(Error, Debug)]
pub enum Error {
    /// A store rejected the operation itself (never triggers failover)
    #[error("{role} store rejected the operation: {source}")]
    Logic {
        /// Store whose error is authoritative for this operation
        role: StoreRole,
        /// Underlying classified error
        source: ClassifiedError,
    },

    /// The only store that could serve the operation was unreachable
    #[error("{role} store unreachable: {source}")]
    Unavailable {
        /// Store that was attempted
        role: StoreRole,
        /// Underlying classified error
        source: ClassifiedError,
    },

    /// Both stores were unreachable; no further fallback tier exists
    #[error("both stores failed (primary: {primary}; secondary: {secondary})")]
    Combined {
        /// Primary store failure
        primary: ClassifiedError,
        /// Secondary store failure
        secondary: ClassifiedError,
    },

    /// Gate acquisition exceeded the configured timeout
    #[error("timed out after {0:?} waiting for the serialization gate")]
    GateTimeout(Duration),

    /// Invalid coordinator configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Failure kind of the surfaced store error, if any
    ///
    /// `Combined` reports [`FailureKind::Connectivity`] since it only arises
    /// when every store was unreachable.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Logic { source, .. } | Self::Unavailable { source, .. } => Some(source.kind()),
            Self::Combined { .. } => Some(FailureKind::Connectivity),
            _ => None,
        }
    }

    /// The store error surfaced to the caller, for single-store failures
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Logic { source, .. } | Self::Unavailable { source, .. } => Some(source.error()),
            _ => None,
        }
    }

    /// Check whether this is a "record not found" logic failure
    pub fn is_not_found(&self) -> bool {
        matches!(self.store_error(), Some(StoreError::NotFound(_)))
    }

    /// Check whether both stores failed
    pub fn is_combined(&self) -> bool {
        matches!(self, Self::Combined { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_error_names_both_failures() {
        let err = Error::Combined {
            primary: StoreError::unreachable("cloud-sql").into(),
            secondary: StoreError::timeout("local sqlite busy").into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cloud-sql"));
        assert!(msg.contains("local sqlite busy"));
        assert_eq!(err.failure_kind(), Some(FailureKind::Connectivity));
        assert!(err.is_combined());
    }

    #[test]
    fn test_logic_error_exposes_store_error() {
        let err = Error::Logic {
            role: StoreRole::Primary,
            source: StoreError::not_found("bill 42").into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.failure_kind(), Some(FailureKind::Logic));
        assert!(err.to_string().starts_with("primary store rejected"));
    }
}
