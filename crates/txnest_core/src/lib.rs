//! # txnest Core
//!
//! Nested transaction coordinator over an in-process record store.
//!
//! This crate provides:
//! - A multi-version record store with read-committed and serializable views
//! - Per-transaction write buffers with configurable flush modes
//! - `Required` / `RequiresNew` propagation with rollback-only tracking
//! - Error-kind based `no_rollback_for` rules
//! - A commit journal (in memory or on disk)
//! - After-commit event delivery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use txnest_core::{Record, Store, TransactionConfig, TransactionCoordinator};
//!
//! let coordinator = TransactionCoordinator::new(Arc::new(Store::new()));
//!
//! coordinator.run(&TransactionConfig::required(), |tx| {
//!     tx.put("serial", Record::new(1).with("name", "Lost").with("rating", 8));
//!     Ok(())
//! })?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod config;
mod error;
mod event;
mod record;
mod store;
mod transaction;
mod types;

pub use buffer::{FlushMode, PendingWrite, WriteBuffer};
pub use config::{CoordinatorConfig, Isolation, Propagation, TransactionConfig};
pub use error::{CoreError, CoreResult, ErrorKind, SinkError, StoreError, StoreResult};
pub use event::{ChangeFeed, CommitEvent, EventSink, JsonLinesSink, NullSink};
pub use record::{Record, Value};
pub use store::{
    CommitEntry, CommitJournal, Constraint, FileJournal, JournalFile, JournalWrite,
    MemoryJournal, SnapshotView, Store, StoreTransaction,
};
pub use transaction::{Outcome, TransactionCoordinator, Tx};
pub use types::{RecordId, RecordKey, SequenceNumber, TransactionId};
