//! Per-transaction staging of writes.

use crate::record::Record;
use crate::types::{RecordId, RecordKey};
use std::collections::BTreeMap;

/// When staged writes are pushed into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlushMode {
    /// Before every store read, before commit, and on explicit flush.
    Always,
    /// Before a store read of a table with staged changes, before commit,
    /// and on explicit flush.
    #[default]
    Auto,
    /// Before commit and on explicit flush.
    Commit,
    /// Only on explicit flush. Writes still staged at commit are dropped.
    Manual,
}

impl FlushMode {
    /// Returns true if staged writes are flushed as part of commit.
    #[must_use]
    pub fn flushes_on_commit(self) -> bool {
        !matches!(self, FlushMode::Manual)
    }
}

/// A staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    /// Insert or replace a record.
    Put(Record),
    /// Delete a record.
    Delete,
}

/// Writes staged by a physical transaction and not yet visible to the store.
///
/// The last write per key wins, so a delete replaces an earlier put of the
/// same record and vice versa.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    writes: BTreeMap<RecordKey, PendingWrite>,
}

impl WriteBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a put.
    pub fn put(&mut self, table: &str, record: Record) {
        let key = RecordKey::new(table, record.id());
        self.writes.insert(key, PendingWrite::Put(record));
    }

    /// Stages a delete.
    pub fn delete(&mut self, table: &str, id: RecordId) {
        self.writes
            .insert(RecordKey::new(table, id), PendingWrite::Delete);
    }

    /// Returns the staged write for a record, if any.
    #[must_use]
    pub fn get(&self, table: &str, id: RecordId) -> Option<&PendingWrite> {
        self.writes.get(&RecordKey::new(table, id))
    }

    /// Returns true if any write is staged against `table`.
    #[must_use]
    pub fn has_changes_for(&self, table: &str) -> bool {
        self.writes.keys().any(|key| key.table == table)
    }

    /// Decides whether a store read of `table` must be preceded by a flush.
    #[must_use]
    pub fn needs_flush_before_read(&self, mode: FlushMode, table: &str) -> bool {
        match mode {
            FlushMode::Always => !self.is_empty(),
            FlushMode::Auto => self.has_changes_for(table),
            FlushMode::Commit | FlushMode::Manual => false,
        }
    }

    /// Returns the number of staged writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Iterates staged writes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &PendingWrite)> {
        self.writes.iter()
    }

    /// Removes and returns every staged write, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<(RecordKey, PendingWrite)> {
        std::mem::take(&mut self.writes).into_iter().collect()
    }

    /// Drops every staged write, returning how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.writes.len();
        self.writes.clear();
        dropped
    }
}
