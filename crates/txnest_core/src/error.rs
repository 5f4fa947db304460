//! Error types for txnest core.

use crate::types::{RecordKey, TransactionId};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The kind of an error, used for `no_rollback_for` matching.
///
/// Matching is by tag, never by message. Domain kinds carry a caller-chosen
/// static name so that independent units of work can agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An error raised on purpose by a unit of work.
    Domain(&'static str),
    /// A transaction deadline expired.
    Timeout,
    /// A boundary returned normally but its transaction was rollback-only.
    UnexpectedRollback,
    /// The store failed while flushing or committing.
    Store,
    /// An after-commit event sink failed.
    EventSink,
    /// An operation was used in a state that does not allow it.
    InvalidOperation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Domain(name) => write!(f, "{name}"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::UnexpectedRollback => write!(f, "unexpected_rollback"),
            ErrorKind::Store => write!(f, "store"),
            ErrorKind::EventSink => write!(f, "event_sink"),
            ErrorKind::InvalidOperation => write!(f, "invalid_operation"),
        }
    }
}

/// Errors surfaced by [`TransactionCoordinator::run`](crate::TransactionCoordinator::run)
/// and by the operations available to a unit of work.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error raised intentionally by a unit of work.
    #[error("{kind}: {message}")]
    Domain {
        /// Tag used for `no_rollback_for` matching.
        kind: &'static str,
        /// Human readable description.
        message: String,
    },

    /// The transaction deadline expired (or was zero to begin with).
    #[error("transaction timed out: deadline of {timeout:?} exceeded")]
    Timeout {
        /// Timeout configured on the physical transaction.
        timeout: Duration,
    },

    /// The boundary completed normally, but an inner participant had already
    /// marked the shared transaction rollback-only.
    #[error("transaction {txid} silently rolled back because it has been marked as rollback-only")]
    UnexpectedRollback {
        /// The physical transaction that was rolled back.
        txid: TransactionId,
    },

    /// Store failure while flushing or committing.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An after-commit event sink failed. The commit itself stands.
    #[error("event sink failed after commit of {txid}: {message}")]
    EventSink {
        /// The committed transaction whose events were being delivered.
        txid: TransactionId,
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a domain error with the given kind tag.
    pub fn domain(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Domain {
            kind,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns the kind tag of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Domain { kind, .. } => ErrorKind::Domain(*kind),
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::UnexpectedRollback { .. } => ErrorKind::UnexpectedRollback,
            CoreError::Store(_) => ErrorKind::Store,
            CoreError::EventSink { .. } => ErrorKind::EventSink,
            CoreError::InvalidOperation { .. } => ErrorKind::InvalidOperation,
        }
    }

    /// Returns true if this is a domain error with the given tag.
    #[must_use]
    pub fn is_domain(&self, kind: &str) -> bool {
        matches!(self, CoreError::Domain { kind: k, .. } if *k == kind)
    }
}

/// Errors raised by the [`Store`](crate::Store) and its commit journal.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred in the commit journal.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal entry could not be encoded or decoded.
    #[error("journal encoding error: {0}")]
    Encoding(String),

    /// A staged record violates a table constraint.
    #[error("constraint '{constraint}' violated by {key}: {message}")]
    ConstraintViolation {
        /// The offending record.
        key: RecordKey,
        /// Name of the violated constraint.
        constraint: String,
        /// Description of the violation.
        message: String,
    },

    /// The transaction is not (or no longer) registered with the store.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),
}

impl StoreError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }
}

/// Errors raised by an [`EventSink`](crate::EventSink).
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the event failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The event could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink refused the event.
    #[error("event rejected: {0}")]
    Rejected(String),
}
