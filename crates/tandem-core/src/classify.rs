//! Failure classification
//!
//! Every error a [`StoreHandle`](crate::store::StoreHandle) raises is
//! classified exactly once into a [`FailureKind`]. The kind is the single
//! input the coordinator uses to decide whether to fail over:
//!
//! - **Connectivity**: the store could not be reached (timeouts, refused or
//!   reset connections, DNS failures, "server unreachable", SQLSTATE class
//!   `08` and friends). Failover is attempted.
//! - **Logic**: the store was reached and rejected the request (not found,
//!   constraint violation, validation, serialization). Never fails over.
//!
//! Anything the classifier does not recognise is a logic failure.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

/// How a store failure should be treated by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Store unreachable; the operation itself may be valid
    Connectivity,
    /// Store reachable; the operation was rejected
    Logic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity failure"),
            Self::Logic => write!(f, "logic failure"),
        }
    }
}

/// Errors raised by store adapters
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection could not be established or was lost
    #[error("connection failed: {0}")]
    Connection(String),

    /// Operation did not complete in time
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Host name resolution failed
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// Server reported or detected as unreachable
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// I/O errors from sockets or files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Driver error carrying a SQLSTATE code
    #[error("backend error [{sqlstate}]: {message}")]
    Backend {
        /// Five-character SQLSTATE code
        sqlstate: String,
        /// Driver message
        message: String,
    },

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Constraint violation (unique key, foreign key, NOT NULL, ...)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Input rejected before reaching storage
    #[error("validation error: {0}")]
    Validation(String),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Concurrent modification or failed verification
    #[error("conflict: {0}")]
    Conflict(String),

    /// Foreign error from an adapter's driver
    #[error("{0}")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

impl StoreError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an unreachable-server error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    /// Create a backend error with a SQLSTATE code
    pub fn backend(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            sqlstate: sqlstate.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a constraint violation error
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Wrap a foreign driver error
    pub fn other(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io(err.into())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

/// Classify a store error
///
/// Deterministic and free of I/O. Unrecognised errors fail closed as
/// [`FailureKind::Logic`].
pub fn classify(error: &StoreError) -> FailureKind {
    match error {
        StoreError::Connection(_)
        | StoreError::Timeout(_)
        | StoreError::Dns(_)
        | StoreError::Unreachable(_) => FailureKind::Connectivity,
        StoreError::Io(err) => classify_io(err.kind()),
        StoreError::Backend { sqlstate, .. } => classify_sqlstate(sqlstate),
        StoreError::NotFound(_)
        | StoreError::ConstraintViolation(_)
        | StoreError::Validation(_)
        | StoreError::Serialization(_)
        | StoreError::Conflict(_) => FailureKind::Logic,
        StoreError::Other(source) => classify_chain(source.as_ref()),
    }
}

/// Classify an I/O error kind
pub fn classify_io(kind: io::ErrorKind) -> FailureKind {
    if matches!(
        kind,
        io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NetworkDown
    ) {
        FailureKind::Connectivity
    } else {
        FailureKind::Logic
    }
}

/// Classify a SQLSTATE code
///
/// Class `08` (connection exception), `57P01`-`57P03` (server shutting down
/// or not accepting connections), `53300` (too many connections) and the ODBC
/// timeouts `HYT00`/`HYT01` are connectivity failures.
pub fn classify_sqlstate(code: &str) -> FailureKind {
    let code = code.trim().to_ascii_uppercase();
    if code.starts_with("08")
        || matches!(
            code.as_str(),
            "57P01" | "57P02" | "57P03" | "53300" | "HYT00" | "HYT01"
        )
    {
        FailureKind::Connectivity
    } else {
        FailureKind::Logic
    }
}

/// Walk a foreign error's cause chain looking for a transport failure
fn classify_chain(error: &(dyn StdError + 'static)) -> FailureKind {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(store) = err.downcast_ref::<StoreError>() {
            return classify(store);
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if classify_io(io_err.kind()) == FailureKind::Connectivity {
                return FailureKind::Connectivity;
            }
        }
        current = err.source();
    }
    FailureKind::Logic
}

/// A store error paired with its classification
///
/// Every [`StoreHandle`](crate::store::StoreHandle) method returns this type.
/// Converting from a [`StoreError`] runs [`classify()`], so adapters can use
/// `?` on their own errors.
#[derive(Error, Debug)]
#[error("{kind}: {error}")]
pub struct ClassifiedError {
    kind: FailureKind,
    #[source]
    error: StoreError,
}

impl ClassifiedError {
    /// Classify a store error
    pub fn new(error: StoreError) -> Self {
        Self {
            kind: classify(&error),
            error,
        }
    }

    /// Failure kind
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Check whether this failure should trigger failover
    pub fn is_connectivity(&self) -> bool {
        self.kind == FailureKind::Connectivity
    }

    /// Check whether the record was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self.error, StoreError::NotFound(_))
    }

    /// Underlying store error
    pub fn error(&self) -> &StoreError {
        &self.error
    }

    /// Consume and return the underlying store error
    pub fn into_inner(self) -> StoreError {
        self.error
    }
}

impl From<StoreError> for ClassifiedError {
    fn from(error: StoreError) -> Self {
        Self::new(error)
    }
}
