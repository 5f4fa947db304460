//! The nested context stack.
//!
//! Every active unit of work owns one [`TransactionContext`] on the stack,
//! indexed by depth. Contexts that open a physical transaction also push a
//! [`PhysicalTransaction`]; joined contexts point at the physical transaction
//! of the context they joined. Both stacks are strictly LIFO, matching the
//! nesting of `run` calls.

use crate::buffer::{FlushMode, WriteBuffer};
use crate::config::{Isolation, Propagation};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::record::Record;
use crate::store::{Store, StoreTransaction};
use crate::types::TransactionId;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// An event waiting for its physical transaction to commit.
#[derive(Debug, Clone)]
pub(crate) struct PendingEvent {
    pub(crate) topic: String,
    pub(crate) record: Option<Record>,
}

/// Settings a physical transaction is opened with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhysicalSettings {
    pub(crate) isolation: Isolation,
    pub(crate) read_only: bool,
    pub(crate) flush_mode: FlushMode,
    pub(crate) timeout: Option<Duration>,
}

/// A begin/commit/rollback boundary against the store.
#[derive(Debug)]
pub(crate) struct PhysicalTransaction {
    pub(crate) store_txn: StoreTransaction,
    pub(crate) settings: PhysicalSettings,
    deadline: Option<Instant>,
    rollback_only: bool,
    pub(crate) buffer: WriteBuffer,
    pub(crate) events: Vec<PendingEvent>,
}

impl PhysicalTransaction {
    pub(crate) fn new(store_txn: StoreTransaction, settings: PhysicalSettings) -> Self {
        Self {
            store_txn,
            settings,
            // A timeout past the end of the clock never expires.
            deadline: settings.timeout.and_then(|t| Instant::now().checked_add(t)),
            rollback_only: false,
            buffer: WriteBuffer::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.store_txn.id()
    }

    pub(crate) fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Marks the transaction doomed. Never cleared.
    pub(crate) fn mark_rollback_only(&mut self, reason: &str) {
        if !self.rollback_only {
            debug!(txid = %self.id(), reason, "transaction marked rollback-only");
        }
        self.rollback_only = true;
    }

    pub(crate) fn check_deadline(&self) -> CoreResult<()> {
        match (self.deadline, self.settings.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                warn!(txid = %self.id(), ?timeout, "transaction deadline exceeded");
                Err(CoreError::Timeout { timeout })
            }
            _ => Ok(()),
        }
    }

    /// Pushes staged writes into the store's private layer for this
    /// transaction.
    ///
    /// Read-only transactions keep their writes staged and never touch the
    /// store. A store failure dooms the transaction.
    pub(crate) fn flush(&mut self, store: &Store) -> CoreResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        if self.settings.read_only {
            trace!(txid = %self.id(), staged = self.buffer.len(), "read-only, flush skipped");
            return Ok(0);
        }
        self.check_deadline()?;

        let writes = self.buffer.drain();
        match store.apply(&self.store_txn, writes) {
            Ok(count) => {
                debug!(txid = %self.id(), count, "flushed staged writes");
                Ok(count)
            }
            Err(e) => {
                self.mark_rollback_only("flush failed");
                Err(e.into())
            }
        }
    }

    /// Flushes if the flush mode requires it before reading `table`.
    pub(crate) fn flush_before_read(&mut self, store: &Store, table: &str) -> CoreResult<()> {
        if self
            .buffer
            .needs_flush_before_read(self.settings.flush_mode, table)
        {
            self.flush(store)?;
        }
        Ok(())
    }
}

/// One node of the nested-transaction stack.
#[derive(Debug)]
pub(crate) struct TransactionContext {
    pub(crate) propagation: Propagation,
    pub(crate) no_rollback_for: HashSet<ErrorKind>,
    /// Index of the physical transaction this context runs in.
    pub(crate) physical: usize,
    /// True if this context opened `physical`.
    pub(crate) is_new: bool,
}

impl TransactionContext {
    pub(crate) fn suppresses(&self, kind: ErrorKind) -> bool {
        self.no_rollback_for.contains(&kind)
    }
}

/// Arena of active contexts and physical transactions.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    contexts: Vec<TransactionContext>,
    physicals: Vec<PhysicalTransaction>,
}

impl ContextStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn depth(&self) -> usize {
        self.contexts.len()
    }

    /// Index of the physical transaction the innermost context runs in.
    pub(crate) fn current_physical(&self) -> Option<usize> {
        self.contexts.last().map(|c| c.physical)
    }

    /// Pushes a context joining the physical transaction at `physical`.
    pub(crate) fn push_joined(
        &mut self,
        propagation: Propagation,
        no_rollback_for: HashSet<ErrorKind>,
        physical: usize,
    ) -> usize {
        self.contexts.push(TransactionContext {
            propagation,
            no_rollback_for,
            physical,
            is_new: false,
        });
        self.contexts.len() - 1
    }

    /// Pushes a context together with the physical transaction it opens.
    pub(crate) fn push_physical(
        &mut self,
        propagation: Propagation,
        no_rollback_for: HashSet<ErrorKind>,
        transaction: PhysicalTransaction,
    ) -> usize {
        self.physicals.push(transaction);
        self.contexts.push(TransactionContext {
            propagation,
            no_rollback_for,
            physical: self.physicals.len() - 1,
            is_new: true,
        });
        self.contexts.len() - 1
    }

    /// Pops the innermost context.
    ///
    /// If it opened a physical transaction, that transaction is popped and
    /// returned with it.
    pub(crate) fn pop(&mut self) -> Option<(TransactionContext, Option<PhysicalTransaction>)> {
        let context = self.contexts.pop()?;
        let physical = if context.is_new {
            self.physicals.pop()
        } else {
            None
        };
        Some((context, physical))
    }

    pub(crate) fn context(&self, index: usize) -> &TransactionContext {
        &self.contexts[index]
    }

    pub(crate) fn physical(&self, index: usize) -> &PhysicalTransaction {
        &self.physicals[index]
    }

    pub(crate) fn physical_mut(&mut self, index: usize) -> &mut PhysicalTransaction {
        &mut self.physicals[index]
    }
}
