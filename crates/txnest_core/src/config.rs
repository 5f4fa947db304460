//! Coordinator and per-unit-of-work configuration.

use crate::buffer::FlushMode;
use crate::error::ErrorKind;
use std::collections::HashSet;
use std::time::Duration;

/// Whether a unit of work joins the current transaction or opens its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Propagation {
    /// Join the ambient transaction if there is one, else open a new one.
    #[default]
    Required,
    /// Always open a new, independent physical transaction.
    RequiresNew,
}

/// Visibility of commits made by other transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Isolation {
    /// Every read sees the latest committed state.
    #[default]
    ReadCommitted,
    /// Reads see the committed state as of transaction begin.
    Serializable,
}

/// Settings shared by every transaction a coordinator opens.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Flush mode used when a transaction does not choose one.
    pub default_flush_mode: FlushMode,

    /// Isolation used when a transaction does not choose one.
    pub default_isolation: Isolation,

    /// Timeout used when a transaction does not choose one (`None` = unbounded).
    pub default_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_flush_mode: FlushMode::Auto,
            default_isolation: Isolation::ReadCommitted,
            default_timeout: None,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default flush mode.
    #[must_use]
    pub const fn default_flush_mode(mut self, mode: FlushMode) -> Self {
        self.default_flush_mode = mode;
        self
    }

    /// Sets the default isolation level.
    #[must_use]
    pub const fn default_isolation(mut self, isolation: Isolation) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Sets the default timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Configuration of a single unit of work.
///
/// `isolation`, `read_only`, `timeout` and `flush_mode` only take effect when
/// the unit of work actually opens a physical transaction. A `Required` unit
/// that joins an existing transaction inherits all of them from it.
/// `no_rollback_for` always applies, but only to errors that reach this
/// unit's own boundary.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Join-or-open behavior.
    pub propagation: Propagation,
    /// Isolation override (`None` = coordinator default).
    pub isolation: Option<Isolation>,
    /// Discard staged writes instead of flushing them.
    pub read_only: bool,
    /// Timeout override (`None` = coordinator default).
    pub timeout: Option<Duration>,
    /// Error kinds that do not mark the transaction rollback-only here.
    pub no_rollback_for: HashSet<ErrorKind>,
    /// Flush mode override (`None` = coordinator default).
    pub flush_mode: Option<FlushMode>,
}

impl TransactionConfig {
    /// A `Required` configuration with no overrides.
    #[must_use]
    pub fn required() -> Self {
        Self::default()
    }

    /// A `RequiresNew` configuration with no overrides.
    #[must_use]
    pub fn requires_new() -> Self {
        Self::default().propagation(Propagation::RequiresNew)
    }

    /// Sets the propagation.
    #[must_use]
    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Sets the isolation level.
    #[must_use]
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Sets the read-only flag.
    #[must_use]
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the timeout in whole seconds.
    #[must_use]
    pub fn timeout_secs(self, seconds: u64) -> Self {
        self.timeout(Duration::from_secs(seconds))
    }

    /// Adds an error kind that must not mark the transaction rollback-only.
    #[must_use]
    pub fn no_rollback_for(mut self, kind: ErrorKind) -> Self {
        self.no_rollback_for.insert(kind);
        self
    }

    /// Sets the flush mode.
    #[must_use]
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = Some(mode);
        self
    }
}
