//! Fault injection doubles.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;
use txnest_core::{
    CommitEntry, CommitEvent, CommitJournal, EventSink, JournalFile, MemoryJournal, SinkError,
    StoreResult,
};

/// A journal that starts failing after a number of successful appends.
#[derive(Debug)]
pub struct FaultyJournal {
    inner: MemoryJournal,
    healthy_appends: usize,
    attempts: Arc<AtomicUsize>,
}

impl FaultyJournal {
    /// Fails every append.
    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    /// Accepts `n` appends, then fails every later one.
    pub fn failing_after(n: usize) -> Self {
        Self {
            inner: MemoryJournal::new(),
            healthy_appends: n,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a counter of append attempts that stays readable after the
    /// journal is moved into a store.
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }
}

impl CommitJournal for FaultyJournal {
    fn append(&mut self, entry: &CommitEntry) -> StoreResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.healthy_appends {
            warn!(sequence = %entry.sequence, "injected journal failure");
            return Err(io::Error::other("injected journal failure").into());
        }
        self.inner.append(entry)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// A journal file on disk whose `n`-th append writes half its data and fails,
/// like a disk filling up mid-frame.
#[derive(Debug)]
pub struct TornFile {
    file: File,
    appends: usize,
    tear_on: usize,
}

impl TornFile {
    /// Opens `path` for appending; append number `tear_on` (from 1) tears.
    pub fn open(path: &Path, tear_on: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            appends: 0,
            tear_on,
        })
    }
}

impl JournalFile for TornFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.appends += 1;
        if self.appends == self.tear_on {
            self.file.write_all(&data[..data.len() / 2])?;
            warn!(append = self.appends, "injected torn journal write");
            return Err(io::Error::other("injected torn write"));
        }
        self.file.write_all(data)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }
}

/// An event sink that rejects every event and counts how often it was
/// called.
#[derive(Debug, Default)]
pub struct FailingSink {
    calls: AtomicUsize,
}

impl FailingSink {
    /// Creates a new failing sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many events were offered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EventSink for FailingSink {
    fn notify_after_commit(&self, event: &CommitEvent) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Rejected(format!(
            "cannot deliver '{}' from {}",
            event.topic, event.txid
        )))
    }
}
