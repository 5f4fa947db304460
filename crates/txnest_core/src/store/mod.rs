//! Multi-version record store.
//!
//! The store keeps every committed version of every record, tagged with the
//! commit sequence that produced it. Writes reach the store in two steps:
//!
//! 1. **Flush**: a physical transaction pushes its staged writes into a
//!    private layer of the store. They are visible to that transaction's own
//!    reads and to nobody else.
//! 2. **Commit**: the private layer is journaled, stamped with the next
//!    sequence number and installed as new versions.
//!
//! Rolling back simply drops the private layer.
//!
//! Serializable readers pin the sequence number current at their begin and
//! ignore newer versions; read-committed readers always see the newest one.

mod journal;
mod view;

pub use journal::{
    CommitEntry, CommitJournal, FileJournal, JournalFile, JournalWrite, MemoryJournal,
};
pub use view::SnapshotView;

use crate::buffer::PendingWrite;
use crate::config::Isolation;
use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use crate::types::{RecordId, RecordKey, SequenceNumber, TransactionId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Validation hook run against every record flushed into a table.
pub type Constraint = Box<dyn Fn(&Record) -> Result<(), String> + Send + Sync>;

struct NamedConstraint {
    name: String,
    check: Constraint,
}

/// A committed version of a record. `None` marks a deletion.
#[derive(Debug, Clone)]
struct Version {
    seq: SequenceNumber,
    record: Option<Record>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// table -> id -> versions in commit order.
    tables: HashMap<String, BTreeMap<RecordId, Vec<Version>>>,
    /// Flushed but uncommitted writes, per open transaction.
    flushed: HashMap<TransactionId, BTreeMap<RecordKey, Option<Record>>>,
    /// Sequence of the latest commit.
    committed_seq: SequenceNumber,
}

impl StoreState {
    fn install(&mut self, seq: SequenceNumber, key: RecordKey, record: Option<Record>) {
        self.tables
            .entry(key.table)
            .or_default()
            .entry(key.id)
            .or_default()
            .push(Version { seq, record });
    }

    fn committed(
        &self,
        table: &str,
        id: RecordId,
        snapshot: Option<SequenceNumber>,
    ) -> Option<&Record> {
        let versions = self.tables.get(table)?.get(&id)?;
        visible(versions, snapshot)
    }

    fn read(
        &self,
        txn: Option<TransactionId>,
        snapshot: Option<SequenceNumber>,
        table: &str,
        id: RecordId,
    ) -> Option<Record> {
        if let Some(layer) = txn.and_then(|t| self.flushed.get(&t)) {
            if let Some(own) = layer.get(&RecordKey::new(table, id)) {
                return own.clone();
            }
        }
        self.committed(table, id, snapshot).cloned()
    }

    fn scan(
        &self,
        txn: Option<TransactionId>,
        snapshot: Option<SequenceNumber>,
        table: &str,
    ) -> Vec<Record> {
        let mut rows: BTreeMap<RecordId, Record> = self
            .tables
            .get(table)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|(id, versions)| {
                        visible(versions, snapshot).map(|r| (*id, r.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(layer) = txn.and_then(|t| self.flushed.get(&t)) {
            for (key, write) in layer.iter().filter(|(k, _)| k.table == table) {
                match write {
                    Some(record) => {
                        rows.insert(key.id, record.clone());
                    }
                    None => {
                        rows.remove(&key.id);
                    }
                }
            }
        }

        rows.into_values().collect()
    }
}

fn visible(versions: &[Version], snapshot: Option<SequenceNumber>) -> Option<&Record> {
    let version = match snapshot {
        Some(seq) => versions.iter().rev().find(|v| v.seq <= seq)?,
        None => versions.last()?,
    };
    version.record.as_ref()
}

/// A physical transaction registered with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTransaction {
    id: TransactionId,
    snapshot: SequenceNumber,
}

impl StoreTransaction {
    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the committed sequence current when the transaction began.
    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }
}

/// A key-keyed table of records with snapshot reads.
///
/// The store is shared by every physical transaction of a coordinator (and
/// may be shared across coordinators and threads). Transactions never see
/// each other's uncommitted writes.
pub struct Store {
    state: RwLock<StoreState>,
    journal: Mutex<Box<dyn CommitJournal>>,
    constraints: RwLock<HashMap<String, Vec<NamedConstraint>>>,
    next_txid: AtomicU64,
}

impl Store {
    /// Creates an empty store journaling to memory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Box::new(MemoryJournal::new()))
    }

    /// Creates an empty store with the given journal.
    #[must_use]
    pub fn with_journal(journal: Box<dyn CommitJournal>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            journal: Mutex::new(journal),
            constraints: RwLock::new(HashMap::new()),
            next_txid: AtomicU64::new(1),
        }
    }

    /// Rebuilds a store from replayed journal entries.
    ///
    /// New commits are appended to `journal`, which is usually the same
    /// journal the entries were replayed from.
    pub fn restore(entries: Vec<CommitEntry>, journal: Box<dyn CommitJournal>) -> Self {
        let mut state = StoreState::default();
        let mut max_txid = 0;

        for entry in entries {
            max_txid = max_txid.max(entry.txid.as_u64());
            for write in entry.writes {
                match write {
                    JournalWrite::Put { table, record } => {
                        let key = RecordKey::new(table, record.id());
                        state.install(entry.sequence, key, Some(record));
                    }
                    JournalWrite::Delete { table, id } => {
                        state.install(entry.sequence, RecordKey::new(table, id), None);
                    }
                }
            }
            state.committed_seq = state.committed_seq.max(entry.sequence);
        }

        debug!(sequence = %state.committed_seq, "store restored from journal");

        Self {
            state: RwLock::new(state),
            journal: Mutex::new(journal),
            constraints: RwLock::new(HashMap::new()),
            next_txid: AtomicU64::new(max_txid + 1),
        }
    }

    /// Registers a constraint checked for every record flushed into `table`.
    pub fn add_constraint<F>(&self, table: impl Into<String>, name: impl Into<String>, check: F)
    where
        F: Fn(&Record) -> Result<(), String> + Send + Sync + 'static,
    {
        self.constraints
            .write()
            .entry(table.into())
            .or_default()
            .push(NamedConstraint {
                name: name.into(),
                check: Box::new(check),
            });
    }

    // ========== Physical transactions ==========

    /// Registers a new physical transaction and captures its snapshot.
    pub fn begin(&self) -> StoreTransaction {
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.write();
        state.flushed.insert(id, BTreeMap::new());
        let txn = StoreTransaction {
            id,
            snapshot: state.committed_seq,
        };
        debug!(txid = %id, snapshot = %txn.snapshot, "store transaction registered");
        txn
    }

    /// Flushes staged writes into the transaction's private layer.
    ///
    /// Constraints are checked before anything is applied, so a violation
    /// leaves the layer untouched.
    pub fn apply(
        &self,
        txn: &StoreTransaction,
        writes: Vec<(RecordKey, PendingWrite)>,
    ) -> StoreResult<usize> {
        self.check_constraints(&writes)?;

        let mut state = self.state.write();
        let layer = state
            .flushed
            .get_mut(&txn.id)
            .ok_or(StoreError::UnknownTransaction(txn.id))?;

        let count = writes.len();
        for (key, write) in writes {
            let value = match write {
                PendingWrite::Put(record) => Some(record),
                PendingWrite::Delete => None,
            };
            layer.insert(key, value);
        }
        Ok(count)
    }

    fn check_constraints(&self, writes: &[(RecordKey, PendingWrite)]) -> StoreResult<()> {
        let constraints = self.constraints.read();
        for (key, write) in writes {
            let PendingWrite::Put(record) = write else {
                continue;
            };
            let Some(checks) = constraints.get(&key.table) else {
                continue;
            };
            for constraint in checks {
                if let Err(message) = (constraint.check)(record) {
                    warn!(%key, constraint = %constraint.name, "constraint violated");
                    return Err(StoreError::ConstraintViolation {
                        key: key.clone(),
                        constraint: constraint.name.clone(),
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    /// Commits the transaction's private layer.
    ///
    /// Returns the sequence at which the writes became visible. A commit with
    /// nothing flushed does not consume a sequence number and returns the
    /// current one. On error the layer is gone: the transaction is rolled
    /// back.
    ///
    /// Sequences are assigned and installed while holding the journal lock,
    /// so they follow journal order. The state lock is never held across the
    /// journal append: readers keep going while an entry is synced.
    pub fn commit(&self, txn: &StoreTransaction) -> StoreResult<SequenceNumber> {
        let layer = self
            .state
            .write()
            .flushed
            .remove(&txn.id)
            .ok_or(StoreError::UnknownTransaction(txn.id))?;
        if layer.is_empty() {
            return Ok(self.committed_seq());
        }

        // Only committers holding this lock move `committed_seq`.
        let mut journal = self.journal.lock();
        let sequence = self.committed_seq().next();

        let entry = CommitEntry {
            sequence,
            txid: txn.id,
            writes: layer
                .iter()
                .map(|(key, write)| match write {
                    Some(record) => JournalWrite::Put {
                        table: key.table.clone(),
                        record: record.clone(),
                    },
                    None => JournalWrite::Delete {
                        table: key.table.clone(),
                        id: key.id,
                    },
                })
                .collect(),
        };

        // Journal first; nothing is installed if this fails.
        journal.append(&entry)?;

        let count = layer.len();
        let mut state = self.state.write();
        for (key, record) in layer {
            state.install(sequence, key, record);
        }
        state.committed_seq = sequence;

        debug!(txid = %txn.id, %sequence, writes = count, "store transaction committed");
        Ok(sequence)
    }

    /// Drops the transaction's private layer. Returns how many flushed
    /// writes were discarded.
    pub fn rollback(&self, txn: &StoreTransaction) -> usize {
        let discarded = self
            .state
            .write()
            .flushed
            .remove(&txn.id)
            .map_or(0, |layer| layer.len());
        debug!(txid = %txn.id, discarded, "store transaction rolled back");
        discarded
    }

    /// Returns the view a physical transaction reads through.
    #[must_use]
    pub fn transaction_view(&self, txn: &StoreTransaction, isolation: Isolation) -> SnapshotView<'_> {
        let pinned = match isolation {
            Isolation::Serializable => Some(txn.snapshot),
            Isolation::ReadCommitted => None,
        };
        SnapshotView::new(self, Some(txn.id), pinned)
    }

    // ========== Autocommit access ==========

    /// Returns a view outside any transaction.
    ///
    /// A serializable view is pinned to the sequence current now; a
    /// read-committed view follows every later commit.
    #[must_use]
    pub fn snapshot_view(&self, isolation: Isolation) -> SnapshotView<'_> {
        let pinned = match isolation {
            Isolation::Serializable => Some(self.committed_seq()),
            Isolation::ReadCommitted => None,
        };
        SnapshotView::new(self, None, pinned)
    }

    /// Returns the latest committed version of a record.
    #[must_use]
    pub fn get(&self, table: &str, id: impl Into<RecordId>) -> Option<Record> {
        self.state.read().read(None, None, table, id.into())
    }

    /// Returns the number of committed records in a table.
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.state.read().scan(None, None, table).len()
    }

    /// Returns every committed record in a table, ordered by ID.
    #[must_use]
    pub fn find_all(&self, table: &str) -> Vec<Record> {
        self.state.read().scan(None, None, table)
    }

    /// Writes a record in its own single-statement transaction.
    pub fn put(&self, table: &str, record: Record) -> StoreResult<SequenceNumber> {
        let key = RecordKey::new(table, record.id());
        self.autocommit(vec![(key, PendingWrite::Put(record))])
    }

    /// Deletes a record in its own single-statement transaction.
    pub fn delete(&self, table: &str, id: impl Into<RecordId>) -> StoreResult<SequenceNumber> {
        self.autocommit(vec![(RecordKey::new(table, id), PendingWrite::Delete)])
    }

    fn autocommit(&self, writes: Vec<(RecordKey, PendingWrite)>) -> StoreResult<SequenceNumber> {
        let txn = self.begin();
        if let Err(e) = self.apply(&txn, writes) {
            self.rollback(&txn);
            return Err(e);
        }
        self.commit(&txn)
    }

    /// Returns the sequence of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.state.read().committed_seq
    }

    /// Returns the number of registered, unfinished transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.read().flushed.len()
    }

    pub(crate) fn read(
        &self,
        txn: Option<TransactionId>,
        snapshot: Option<SequenceNumber>,
        table: &str,
        id: RecordId,
    ) -> Option<Record> {
        self.state.read().read(txn, snapshot, table, id)
    }

    pub(crate) fn scan(
        &self,
        txn: Option<TransactionId>,
        snapshot: Option<SequenceNumber>,
        table: &str,
    ) -> Vec<Record> {
        self.state.read().scan(txn, snapshot, table)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("committed_seq", &self.committed_seq())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}
