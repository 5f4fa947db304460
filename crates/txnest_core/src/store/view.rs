//! Read-only views over the store.

use crate::record::Record;
use crate::store::Store;
use crate::types::{RecordId, SequenceNumber, TransactionId};

/// A read path into the [`Store`].
///
/// A view optionally belongs to a physical transaction (it then also sees
/// that transaction's flushed writes) and is optionally pinned to a commit
/// sequence (serializable isolation). Reading through a view never flushes
/// anything.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView<'a> {
    store: &'a Store,
    txn: Option<TransactionId>,
    pinned: Option<SequenceNumber>,
}

impl<'a> SnapshotView<'a> {
    pub(crate) fn new(
        store: &'a Store,
        txn: Option<TransactionId>,
        pinned: Option<SequenceNumber>,
    ) -> Self {
        Self { store, txn, pinned }
    }

    /// Returns the sequence this view is pinned to, if any.
    #[must_use]
    pub fn pinned_at(&self) -> Option<SequenceNumber> {
        self.pinned
    }

    /// Returns the transaction this view belongs to, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<TransactionId> {
        self.txn
    }

    /// Reads a record.
    #[must_use]
    pub fn get(&self, table: &str, id: impl Into<RecordId>) -> Option<Record> {
        self.store.read(self.txn, self.pinned, table, id.into())
    }

    /// Returns true if the record is visible.
    #[must_use]
    pub fn contains(&self, table: &str, id: impl Into<RecordId>) -> bool {
        self.get(table, id).is_some()
    }

    /// Counts visible records in a table.
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.scan(table).len()
    }

    /// Returns visible records in a table, ordered by ID.
    #[must_use]
    pub fn scan(&self, table: &str) -> Vec<Record> {
        self.store.scan(self.txn, self.pinned, table)
    }
}
