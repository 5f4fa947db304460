//! After-commit event delivery.
//!
//! Units of work queue events on their physical transaction with
//! [`Tx::publish`](crate::Tx::publish). The queue is handed to the
//! coordinator's [`EventSink`] only after that physical transaction commits;
//! a rollback drops it.

mod feed;
mod file;

pub use feed::ChangeFeed;
pub use file::JsonLinesSink;

use crate::error::SinkError;
use crate::record::Record;
use crate::types::{SequenceNumber, TransactionId};
use serde::{Deserialize, Serialize};

/// An event produced by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEvent {
    /// Sequence the producing transaction committed at.
    pub sequence: SequenceNumber,
    /// The producing physical transaction.
    pub txid: TransactionId,
    /// Caller-chosen topic.
    pub topic: String,
    /// Payload, if any.
    pub record: Option<Record>,
}

/// Receiver of after-commit notifications.
///
/// A sink failure is reported to the caller of the committing boundary as
/// [`CoreError::EventSink`](crate::CoreError::EventSink). The commit is not
/// undone and delivery is not retried.
pub trait EventSink: Send + Sync {
    /// Delivers one event of a committed transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be handled.
    fn notify_after_commit(&self, event: &CommitEvent) -> Result<(), SinkError>;
}

/// Sink that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify_after_commit(&self, _event: &CommitEvent) -> Result<(), SinkError> {
        Ok(())
    }
}
