//! Test fixtures and coordinator helpers.
//!
//! Provides convenience functions for setting up coordinators over a fresh
//! store, with the catalog constraints installed and a change feed attached.

use crate::catalog;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use txnest_core::{
    ChangeFeed, CommitJournal, CoordinatorConfig, EventSink, FileJournal, Store,
    TransactionCoordinator,
};

/// A coordinator over a fresh store with automatic cleanup.
pub struct TestCoordinator {
    /// The coordinator.
    pub coordinator: TransactionCoordinator,
    /// Feed receiving every after-commit event (unless a custom sink is set).
    pub feed: Arc<ChangeFeed>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestCoordinator {
    /// Creates a coordinator over an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with_config(CoordinatorConfig::default())
    }

    /// Creates a coordinator over an in-memory store with a custom config.
    pub fn memory_with_config(config: CoordinatorConfig) -> Self {
        Self::build(Store::new(), config, None)
    }

    /// Creates a coordinator whose store journals to a temporary file.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let journal = FileJournal::open(&temp_dir.path().join("commits.log"))
            .expect("Failed to open journal");
        Self::build(
            Store::with_journal(Box::new(journal)),
            CoordinatorConfig::default(),
            Some(temp_dir),
        )
    }

    /// Creates a coordinator whose store appends to the given journal.
    pub fn with_journal(journal: Box<dyn CommitJournal>) -> Self {
        Self::build(Store::with_journal(journal), CoordinatorConfig::default(), None)
    }

    fn build(store: Store, config: CoordinatorConfig, temp_dir: Option<TempDir>) -> Self {
        catalog::install_constraints(&store);
        let feed = Arc::new(ChangeFeed::new());
        let coordinator = TransactionCoordinator::new(Arc::new(store))
            .with_config(config)
            .with_event_sink(feed.clone());
        Self {
            coordinator,
            feed,
            temp_dir,
        }
    }

    /// Replaces the event sink. The change feed no longer receives events.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.coordinator = self.coordinator.with_event_sink(sink);
        self
    }

    /// Returns the journal path if file-backed, None if in-memory.
    pub fn journal_path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("commits.log"))
    }

    /// Returns a path inside the temporary directory, creating one if needed.
    pub fn temp_path(&mut self, name: &str) -> PathBuf {
        self.temp_dir
            .get_or_insert_with(|| TempDir::new().expect("Failed to create temp directory"))
            .path()
            .join(name)
    }
}

impl std::ops::Deref for TestCoordinator {
    type Target = TransactionCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Runs a test with a fresh in-memory coordinator.
///
/// # Example
///
/// ```rust,ignore
/// use txnest_testkit::with_coordinator;
///
/// #[test]
/// fn my_test() {
///     with_coordinator(|c| {
///         assert_eq!(c.store().count("serial"), 0);
///     });
/// }
/// ```
pub fn with_coordinator<F, R>(f: F) -> R
where
    F: FnOnce(&TestCoordinator) -> R,
{
    crate::init_tracing();
    let coordinator = TestCoordinator::memory();
    f(&coordinator)
}

/// Creates a coordinator whose store already holds serial 1 ("Serial", 5).
pub fn seeded_coordinator() -> TestCoordinator {
    crate::init_tracing();
    let coordinator = TestCoordinator::memory();
    coordinator
        .store()
        .put(catalog::SERIAL, catalog::serial(1, "Serial", 5))
        .expect("Failed to seed serial");
    coordinator
}
