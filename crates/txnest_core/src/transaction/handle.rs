//! The handle a unit of work operates through.

use crate::buffer::{FlushMode, PendingWrite};
use crate::config::{Isolation, Propagation, TransactionConfig};
use crate::error::CoreResult;
use crate::record::Record;
use crate::store::SnapshotView;
use crate::transaction::context::{ContextStack, PendingEvent, PhysicalTransaction};
use crate::transaction::coordinator::{Outcome, TransactionCoordinator};
use crate::types::{RecordId, TransactionId};

/// Access to the transaction a unit of work runs in.
///
/// Writes are staged in the physical transaction's write buffer and reach the
/// store on flush. Reads come in three flavors:
///
/// - [`find`](Self::find) answers from staged writes first, then the store
/// - [`find_all`](Self::find_all) and [`count`](Self::count) read the store
/// - [`store_view`](Self::store_view) reads the store without ever flushing
///
/// The first two flush before a store read when the flush mode asks for it.
///
/// A `Tx` for a joined context operates on the enclosing physical
/// transaction.
pub struct Tx<'a> {
    coordinator: &'a TransactionCoordinator,
    stack: &'a mut ContextStack,
    context: usize,
    physical: usize,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(
        coordinator: &'a TransactionCoordinator,
        stack: &'a mut ContextStack,
        context: usize,
    ) -> Self {
        let physical = stack.context(context).physical;
        Self {
            coordinator,
            stack,
            context,
            physical,
        }
    }

    fn transaction(&self) -> &PhysicalTransaction {
        self.stack.physical(self.physical)
    }

    fn transaction_mut(&mut self) -> &mut PhysicalTransaction {
        self.stack.physical_mut(self.physical)
    }

    // ========== Writes ==========

    /// Stages a put of `record` into `table`.
    pub fn put(&mut self, table: &str, record: Record) {
        self.transaction_mut().buffer.put(table, record);
    }

    /// Stages a delete of record `id` from `table`.
    pub fn delete(&mut self, table: &str, id: impl Into<RecordId>) {
        self.transaction_mut().buffer.delete(table, id.into());
    }

    /// Pushes every staged write into the store.
    ///
    /// Returns the number of writes flushed. Always a no-op for read-only
    /// transactions.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Timeout`](crate::CoreError::Timeout) past the
    /// deadline, or a store error (which also dooms the transaction).
    pub fn flush(&mut self) -> CoreResult<usize> {
        let coordinator = self.coordinator;
        self.transaction_mut().flush(coordinator.store())
    }

    // ========== Reads ==========

    /// Looks a record up, staged writes first.
    ///
    /// A staged write answers without touching the store. Otherwise this is a
    /// store read and flushes first when the flush mode asks for it.
    ///
    /// # Errors
    ///
    /// Fails if the pre-read flush fails or the deadline has passed.
    pub fn find(&mut self, table: &str, id: impl Into<RecordId>) -> CoreResult<Option<Record>> {
        let id = id.into();
        match self.transaction().buffer.get(table, id) {
            Some(PendingWrite::Put(record)) => return Ok(Some(record.clone())),
            Some(PendingWrite::Delete) => return Ok(None),
            None => {}
        }
        self.prepare_read(table)?;
        Ok(self.store_view().get(table, id))
    }

    /// Returns every record of `table` visible in the store.
    ///
    /// # Errors
    ///
    /// Fails if the pre-read flush fails or the deadline has passed.
    pub fn find_all(&mut self, table: &str) -> CoreResult<Vec<Record>> {
        self.prepare_read(table)?;
        Ok(self.store_view().scan(table))
    }

    /// Counts the records of `table` visible in the store.
    ///
    /// # Errors
    ///
    /// Fails if the pre-read flush fails or the deadline has passed.
    pub fn count(&mut self, table: &str) -> CoreResult<usize> {
        self.prepare_read(table)?;
        Ok(self.store_view().count(table))
    }

    fn prepare_read(&mut self, table: &str) -> CoreResult<()> {
        let coordinator = self.coordinator;
        let transaction = self.transaction_mut();
        transaction.flush_before_read(coordinator.store(), table)?;
        transaction.check_deadline()
    }

    /// Returns a direct view of the store for this transaction.
    ///
    /// The view sees this transaction's flushed writes and committed data
    /// per the transaction's isolation. It never flushes.
    #[must_use]
    pub fn store_view(&self) -> SnapshotView<'a> {
        let transaction = self.transaction();
        self.coordinator
            .store()
            .transaction_view(&transaction.store_txn, transaction.settings.isolation)
    }

    // ========== Events and state ==========

    /// Queues an event for delivery after this physical transaction commits.
    pub fn publish(&mut self, topic: impl Into<String>, record: Option<Record>) {
        let event = PendingEvent {
            topic: topic.into(),
            record,
        };
        self.transaction_mut().events.push(event);
    }

    /// Dooms the physical transaction this context runs in.
    pub fn set_rollback_only(&mut self) {
        self.transaction_mut().mark_rollback_only("requested");
    }

    /// Returns true if the physical transaction is doomed.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.transaction().is_rollback_only()
    }

    /// Returns the physical transaction ID.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction().id()
    }

    /// Returns true if this context opened its physical transaction.
    #[must_use]
    pub fn is_new_transaction(&self) -> bool {
        self.stack.context(self.context).is_new
    }

    /// Returns the propagation this context was started with.
    #[must_use]
    pub fn propagation(&self) -> Propagation {
        self.stack.context(self.context).propagation
    }

    /// Returns the isolation of the physical transaction.
    #[must_use]
    pub fn isolation(&self) -> Isolation {
        self.transaction().settings.isolation
    }

    /// Returns true if the physical transaction is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.transaction().settings.read_only
    }

    /// Returns the flush mode of the physical transaction.
    #[must_use]
    pub fn flush_mode(&self) -> FlushMode {
        self.transaction().settings.flush_mode
    }

    /// Returns the number of staged, unflushed writes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.transaction().buffer.len()
    }

    /// Returns the nesting depth of this context (1 for the outermost).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.context + 1
    }

    // ========== Nesting ==========

    /// Runs a nested unit of work.
    ///
    /// With [`Propagation::Required`] the body joins this transaction; with
    /// [`Propagation::RequiresNew`] it runs in its own physical transaction,
    /// finalized before this returns.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionCoordinator::run`].
    pub fn run<T, F>(&mut self, config: &TransactionConfig, body: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Tx<'_>) -> CoreResult<T>,
    {
        self.run_with_outcome(config, body).0
    }

    /// Like [`run`](Self::run), also reporting how the nested boundary ended.
    pub fn run_with_outcome<T, F>(
        &mut self,
        config: &TransactionConfig,
        body: F,
    ) -> (CoreResult<T>, Outcome)
    where
        F: FnOnce(&mut Tx<'_>) -> CoreResult<T>,
    {
        self.coordinator.execute(self.stack, config, body)
    }
}

impl std::fmt::Debug for Tx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("txid", &self.transaction_id())
            .field("depth", &self.depth())
            .field("new", &self.is_new_transaction())
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}
