//! The transaction coordinator.

use crate::config::{CoordinatorConfig, Propagation, TransactionConfig};
use crate::error::{CoreError, CoreResult};
use crate::event::{CommitEvent, EventSink, NullSink};
use crate::store::Store;
use crate::transaction::context::{ContextStack, PhysicalSettings, PhysicalTransaction};
use crate::transaction::handle::Tx;
use crate::types::SequenceNumber;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How a boundary ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The boundary opened a physical transaction and committed it.
    Committed(SequenceNumber),
    /// The boundary opened a physical transaction and rolled it back.
    RolledBack,
    /// The boundary joined an enclosing transaction; the owner finalizes.
    Joined,
    /// No transaction was opened (zero timeout).
    NotStarted,
}

impl Outcome {
    /// Returns true if the boundary committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed(_))
    }
}

/// Drives nested units of work against a shared [`Store`].
///
/// The coordinator is stateless between calls: every top-level
/// [`run`](Self::run) starts with an empty context stack, and nesting happens
/// through the [`Tx`] handle passed to the body. A coordinator can be shared
/// by reference across threads.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = TransactionCoordinator::new(Arc::new(Store::new()));
///
/// coordinator.run(&TransactionConfig::required(), |tx| {
///     tx.put("serial", Record::new(1).with("name", "Lost"));
///     tx.run(&TransactionConfig::requires_new(), |audit| {
///         audit.put("audit", Record::new(1).with("action", "create"));
///         Ok(())
///     })
/// })?;
/// ```
pub struct TransactionCoordinator {
    store: Arc<Store>,
    sink: Arc<dyn EventSink>,
    config: CoordinatorConfig,
}

impl TransactionCoordinator {
    /// Creates a coordinator with default configuration and no event sink.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            sink: Arc::new(NullSink),
            config: CoordinatorConfig::default(),
        }
    }

    /// Sets the sink notified after each commit.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the coordinator configuration.
    #[must_use]
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Returns the coordinator configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Runs a unit of work in a new top-level transaction.
    ///
    /// # Errors
    ///
    /// Returns the body's error, [`CoreError::Timeout`] for a zero timeout,
    /// [`CoreError::UnexpectedRollback`] if the body returned `Ok` but the
    /// transaction was doomed, a store error if commit failed, or
    /// [`CoreError::EventSink`] if after-commit delivery failed.
    pub fn run<T, F>(&self, config: &TransactionConfig, body: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Tx<'_>) -> CoreResult<T>,
    {
        self.run_with_outcome(config, body).0
    }

    /// Like [`run`](Self::run), also reporting how the boundary ended.
    pub fn run_with_outcome<T, F>(
        &self,
        config: &TransactionConfig,
        body: F,
    ) -> (CoreResult<T>, Outcome)
    where
        F: FnOnce(&mut Tx<'_>) -> CoreResult<T>,
    {
        let mut stack = ContextStack::new();
        self.execute(&mut stack, config, body)
    }

    pub(crate) fn execute<T, F>(
        &self,
        stack: &mut ContextStack,
        config: &TransactionConfig,
        body: F,
    ) -> (CoreResult<T>, Outcome)
    where
        F: FnOnce(&mut Tx<'_>) -> CoreResult<T>,
    {
        let joined = match (config.propagation, stack.current_physical()) {
            (Propagation::Required, Some(physical)) => Some(physical),
            _ => None,
        };

        let context = match joined {
            Some(physical) => {
                trace!(
                    txid = %stack.physical(physical).id(),
                    depth = stack.depth() + 1,
                    "joining existing transaction"
                );
                stack.push_joined(config.propagation, config.no_rollback_for.clone(), physical)
            }
            None => {
                let settings = self.settings_for(config);
                if settings.timeout == Some(Duration::ZERO) {
                    warn!(depth = stack.depth() + 1, "zero timeout, transaction not started");
                    return (
                        Err(CoreError::Timeout {
                            timeout: Duration::ZERO,
                        }),
                        Outcome::NotStarted,
                    );
                }
                let transaction = PhysicalTransaction::new(self.store.begin(), settings);
                debug!(
                    txid = %transaction.id(),
                    depth = stack.depth() + 1,
                    propagation = ?config.propagation,
                    isolation = ?settings.isolation,
                    read_only = settings.read_only,
                    "began physical transaction"
                );
                stack.push_physical(config.propagation, config.no_rollback_for.clone(), transaction)
            }
        };

        let result = {
            let mut tx = Tx::new(self, stack, context);
            body(&mut tx)
        };

        let Some((context, physical)) = stack.pop() else {
            return (
                Err(CoreError::invalid_operation("context stack underflow")),
                Outcome::NotStarted,
            );
        };

        let Some(mut physical) = physical else {
            // Joined: the owning boundary finalizes.
            if let Err(e) = &result {
                if !context.suppresses(e.kind()) {
                    stack
                        .physical_mut(context.physical)
                        .mark_rollback_only(&e.kind().to_string());
                }
            }
            return (result, Outcome::Joined);
        };

        match result {
            Ok(value) => {
                let (committed, outcome) = self.commit(physical);
                (committed.map(|()| value), outcome)
            }
            Err(e) if !context.suppresses(e.kind()) => {
                physical.mark_rollback_only(&e.kind().to_string());
                self.rollback(physical);
                (Err(e), Outcome::RolledBack)
            }
            Err(e) => {
                // Suppressed: commit anyway, unless something else doomed it.
                trace!(txid = %physical.id(), kind = %e.kind(), "error suppressed by no_rollback_for");
                match self.commit(physical) {
                    (Ok(()), outcome) => (Err(e), outcome),
                    (Err(commit_err), outcome) => (Err(commit_err), outcome),
                }
            }
        }
    }

    fn settings_for(&self, config: &TransactionConfig) -> PhysicalSettings {
        PhysicalSettings {
            isolation: config.isolation.unwrap_or(self.config.default_isolation),
            read_only: config.read_only,
            flush_mode: config.flush_mode.unwrap_or(self.config.default_flush_mode),
            timeout: config.timeout.or(self.config.default_timeout),
        }
    }

    fn commit(&self, mut physical: PhysicalTransaction) -> (CoreResult<()>, Outcome) {
        let txid = physical.id();

        if physical.is_rollback_only() {
            self.rollback(physical);
            warn!(%txid, "rollback-only transaction reached commit");
            return (Err(CoreError::UnexpectedRollback { txid }), Outcome::RolledBack);
        }

        if physical.settings.read_only {
            let discarded = physical.buffer.discard();
            trace!(%txid, discarded, "read-only, staged writes discarded");
        } else if physical.settings.flush_mode.flushes_on_commit() {
            if let Err(e) = physical.flush(&self.store) {
                self.rollback(physical);
                return (Err(e), Outcome::RolledBack);
            }
        } else {
            let discarded = physical.buffer.discard();
            if discarded > 0 {
                debug!(%txid, discarded, "manual flush mode, unflushed writes dropped");
            }
        }

        let sequence = match self.store.commit(&physical.store_txn) {
            Ok(sequence) => sequence,
            Err(e) => {
                error!(%txid, error = %e, "commit failed");
                return (Err(e.into()), Outcome::RolledBack);
            }
        };
        debug!(%txid, %sequence, "committed physical transaction");

        for pending in physical.events {
            let event = CommitEvent {
                sequence,
                txid,
                topic: pending.topic,
                record: pending.record,
            };
            if let Err(e) = self.sink.notify_after_commit(&event) {
                error!(%txid, topic = %event.topic, error = %e, "after-commit sink failed");
                return (
                    Err(CoreError::EventSink {
                        txid,
                        message: e.to_string(),
                    }),
                    Outcome::Committed(sequence),
                );
            }
        }

        (Ok(()), Outcome::Committed(sequence))
    }

    fn rollback(&self, physical: PhysicalTransaction) {
        let discarded = self.store.rollback(&physical.store_txn);
        debug!(
            txid = %physical.id(),
            flushed = discarded,
            staged = physical.buffer.len(),
            events = physical.events.len(),
            "rolled back physical transaction"
        );
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Isolation;
    use crate::error::ErrorKind;
    use crate::event::ChangeFeed;
    use crate::record::Record;

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(Store::new()))
    }

    #[test]
    fn commit_makes_writes_visible() {
        let coordinator = coordinator();
        let (result, outcome) = coordinator.run_with_outcome(&TransactionConfig::required(), |tx| {
            tx.put("serial", Record::new(1).with("name", "Lost"));
            Ok(())
        });

        assert!(result.is_ok());
        assert_eq!(outcome, Outcome::Committed(SequenceNumber::new(1)));
        assert!(coordinator.store().get("serial", 1).is_some());
        assert_eq!(coordinator.store().active_count(), 0);
    }

    #[test]
    fn error_rolls_back() {
        let coordinator = coordinator();
        let (result, outcome) =
            coordinator.run_with_outcome(&TransactionConfig::required(), |tx| -> CoreResult<()> {
                tx.put("serial", Record::new(1));
                tx.flush()?;
                Err(CoreError::domain("empty_result", "nothing found"))
            });

        assert!(result.unwrap_err().is_domain("empty_result"));
        assert_eq!(outcome, Outcome::RolledBack);
        assert_eq!(coordinator.store().count("serial"), 0);
        assert_eq!(coordinator.store().active_count(), 0);
    }

    #[test]
    fn joined_inner_reports_joined() {
        let coordinator = coordinator();
        coordinator
            .run(&TransactionConfig::required(), |tx| {
                let outer = tx.transaction_id();
                let (result, outcome) =
                    tx.run_with_outcome(&TransactionConfig::required(), |inner| {
                        assert_eq!(inner.transaction_id(), outer);
                        assert!(!inner.is_new_transaction());
                        Ok(())
                    });
                assert!(result.is_ok());
                assert_eq!(outcome, Outcome::Joined);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn swallowed_inner_error_becomes_unexpected_rollback() {
        let coordinator = coordinator();
        let result = coordinator.run(&TransactionConfig::required(), |tx| {
            tx.put("serial", Record::new(1));
            let inner: CoreResult<()> = tx.run(&TransactionConfig::required(), |_| {
                Err(CoreError::domain("empty_result", "missing"))
            });
            assert!(inner.is_err());
            Ok(())
        });

        assert!(matches!(result, Err(CoreError::UnexpectedRollback { .. })));
        assert_eq!(coordinator.store().count("serial"), 0);
    }

    #[test]
    fn zero_timeout_does_not_invoke_body() {
        let coordinator = coordinator();
        let mut called = false;
        let (result, outcome) = coordinator.run_with_outcome(
            &TransactionConfig::required().timeout_secs(0),
            |_| {
                called = true;
                Ok(())
            },
        );

        assert!(matches!(result, Err(CoreError::Timeout { .. })));
        assert_eq!(outcome, Outcome::NotStarted);
        assert!(!called);
        assert_eq!(coordinator.store().active_count(), 0);
    }

    #[test]
    fn suppressed_error_still_commits() {
        let coordinator = coordinator();
        let config =
            TransactionConfig::required().no_rollback_for(ErrorKind::Domain("recoverable"));
        let (result, outcome) = coordinator.run_with_outcome(&config, |tx| -> CoreResult<()> {
            tx.put("serial", Record::new(1));
            Err(CoreError::domain("recoverable", "ignored"))
        });

        assert!(result.unwrap_err().is_domain("recoverable"));
        assert!(outcome.is_committed());
        assert_eq!(coordinator.store().count("serial"), 1);
    }

    #[test]
    fn events_delivered_after_commit_only() {
        let feed = Arc::new(ChangeFeed::new());
        let coordinator = coordinator().with_event_sink(feed.clone());

        coordinator
            .run(&TransactionConfig::required(), |tx| {
                tx.put("serial", Record::new(1));
                tx.publish("serial.saved", Some(Record::new(1)));
                assert_eq!(feed.history_len(), 0);
                Ok(())
            })
            .unwrap();
        let _ = coordinator.run(&TransactionConfig::required(), |tx| -> CoreResult<()> {
            tx.publish("serial.saved", Some(Record::new(2)));
            Err(CoreError::domain("empty_result", "abort"))
        });

        let events = feed.poll(SequenceNumber::new(0), 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, SequenceNumber::new(1));
        assert_eq!(events[0].topic, "serial.saved");
    }

    #[test]
    fn coordinator_defaults_apply_to_new_transactions() {
        let coordinator = coordinator().with_config(
            CoordinatorConfig::new().default_isolation(Isolation::Serializable),
        );
        coordinator
            .run(&TransactionConfig::required(), |tx| {
                assert_eq!(tx.isolation(), Isolation::Serializable);
                Ok(())
            })
            .unwrap();
    }
}
