//! Commit journal.
//!
//! Every non-empty commit is appended to the journal before its writes become
//! visible in the store. Entries are CBOR-encoded and framed with a
//! little-endian `u32` length prefix:
//!
//! ```text
//! | len: u32 | payload: CBOR(CommitEntry) |
//! ```

use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use crate::types::{RecordId, SequenceNumber, TransactionId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Size of the frame length prefix.
const FRAME_HEADER_SIZE: usize = 4;

/// One write inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalWrite {
    /// A record was inserted or replaced.
    Put {
        /// Target table.
        table: String,
        /// New record contents.
        record: Record,
    },
    /// A record was deleted.
    Delete {
        /// Target table.
        table: String,
        /// Deleted record.
        id: RecordId,
    },
}

/// A committed transaction as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Commit sequence assigned by the store.
    pub sequence: SequenceNumber,
    /// Transaction that produced the commit.
    pub txid: TransactionId,
    /// Writes in key order.
    pub writes: Vec<JournalWrite>,
}

impl CommitEntry {
    /// Encodes the entry as a length-prefixed CBOR frame.
    pub fn encode_frame(&self) -> StoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| StoreError::encoding(e.to_string()))?;

        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::encoding("journal entry too large"))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decodes every frame in `bytes`.
    ///
    /// A truncated trailing frame is ignored: it belongs to an append that
    /// never completed.
    pub fn decode_frames(bytes: &[u8]) -> StoreResult<Vec<CommitEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset + FRAME_HEADER_SIZE <= bytes.len() {
            let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
            len_bytes.copy_from_slice(&bytes[offset..offset + FRAME_HEADER_SIZE]);
            let len = u32::from_le_bytes(len_bytes) as usize;

            let start = offset + FRAME_HEADER_SIZE;
            let end = start + len;
            if end > bytes.len() {
                warn!(offset, len, "ignoring truncated journal frame");
                break;
            }

            let entry: CommitEntry = ciborium::from_reader(&bytes[start..end])
                .map_err(|e| StoreError::encoding(e.to_string()))?;
            entries.push(entry);
            offset = end;
        }

        Ok(entries)
    }
}

/// Append-only sink for commit entries.
///
/// Implementations must be `Send` so a store can be shared across threads;
/// the store serialises access with its own lock.
pub trait CommitJournal: Send {
    /// Appends an entry. The entry must be durable when this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be encoded or written. The store
    /// rolls the committing transaction back in that case.
    fn append(&mut self, entry: &CommitEntry) -> StoreResult<()>;

    /// Returns the number of entries appended through this handle.
    fn len(&self) -> usize;

    /// Returns true if nothing has been appended.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory journal. Keeps encoded frames so tests can inspect them.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    frames: Vec<u8>,
    count: usize,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes every entry appended so far.
    pub fn entries(&self) -> StoreResult<Vec<CommitEntry>> {
        CommitEntry::decode_frames(&self.frames)
    }
}

impl CommitJournal for MemoryJournal {
    fn append(&mut self, entry: &CommitEntry) -> StoreResult<()> {
        let frame = entry.encode_frame()?;
        self.frames.extend_from_slice(&frame);
        self.count += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }
}

/// Byte sink under a [`FileJournal`].
///
/// A failed append may leave part of its data behind; the journal truncates
/// back to the last complete frame in that case.
pub trait JournalFile: Send {
    /// Appends `data` at the end of the file.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> io::Result<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Cuts the file back to `size` bytes.
    fn truncate(&mut self, size: u64) -> io::Result<()>;
}

impl JournalFile for File {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.set_len(size)?;
        self.sync_all()
    }
}

/// File-backed journal.
///
/// Every append writes one whole frame and syncs it. If the write or the
/// sync fails, the file is truncated back to the end of the previous frame so
/// a later append never lands behind a torn one. If even the truncate fails
/// the journal is poisoned and refuses further appends.
pub struct FileJournal {
    path: PathBuf,
    file: Box<dyn JournalFile>,
    size: u64,
    count: usize,
    poisoned: bool,
}

impl FileJournal {
    /// Opens or creates a journal file for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::with_file(path, Box::new(file))
    }

    /// Wraps an already opened file. `path` is where [`replay`](Self::replay)
    /// finds the same bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file size cannot be read.
    pub fn with_file(path: &Path, file: Box<dyn JournalFile>) -> StoreResult<Self> {
        let size = file.size()?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            count: 0,
            poisoned: false,
        })
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if a failed append could not be rolled back.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Reads back every complete entry in a journal file.
    ///
    /// A missing file is an empty journal.
    pub fn replay(path: &Path) -> StoreResult<Vec<CommitEntry>> {
        let mut bytes = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut bytes)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        CommitEntry::decode_frames(&bytes)
    }
}

impl CommitJournal for FileJournal {
    fn append(&mut self, entry: &CommitEntry) -> StoreResult<()> {
        if self.poisoned {
            return Err(StoreError::Io(io::Error::other(format!(
                "journal {} is poisoned by an earlier failed append",
                self.path.display()
            ))));
        }
        let frame = entry.encode_frame()?;

        let written = self.file.append(&frame).and_then(|()| self.file.sync());
        if let Err(e) = written {
            warn!(
                path = %self.path.display(),
                size = self.size,
                error = %e,
                "journal append failed, truncating"
            );
            if let Err(truncate_err) = self.file.truncate(self.size) {
                error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "journal truncate failed, poisoning"
                );
                self.poisoned = true;
            }
            return Err(e.into());
        }

        self.size += frame.len() as u64;
        self.count += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("count", &self.count)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry(seq: u64) -> CommitEntry {
        CommitEntry {
            sequence: SequenceNumber::new(seq),
            txid: TransactionId::new(seq + 100),
            writes: vec![
                JournalWrite::Put {
                    table: "serial".into(),
                    record: Record::new(seq).with("name", "Serial").with("rating", 5),
                },
                JournalWrite::Delete {
                    table: "book".into(),
                    id: RecordId::new(9),
                },
            ],
        }
    }

    #[test]
    fn memory_journal_keeps_entries_in_order() {
        let mut journal = MemoryJournal::new();
        assert!(journal.is_empty());

        journal.append(&entry(1)).unwrap();
        journal.append(&entry(2)).unwrap();

        let entries = journal.entries().unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(entries, vec![entry(1), entry(2)]);
    }

    #[test]
    fn truncated_trailing_frame_is_ignored() {
        let mut bytes = entry(1).encode_frame().unwrap();
        let second = entry(2).encode_frame().unwrap();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let entries = CommitEntry::decode_frames(&bytes).unwrap();
        assert_eq!(entries, vec![entry(1)]);
    }

    #[test]
    fn file_journal_replays_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal").join("commits.log");

        {
            let mut journal = FileJournal::open(&path).unwrap();
            journal.append(&entry(1)).unwrap();
        }
        {
            let mut journal = FileJournal::open(&path).unwrap();
            journal.append(&entry(2)).unwrap();
            assert_eq!(journal.path(), path.as_path());
        }

        let entries = FileJournal::replay(&path).unwrap();
        assert_eq!(entries, vec![entry(1), entry(2)]);
    }

    /// In-memory file that tears the append numbered `tear_on`.
    #[derive(Clone, Default)]
    struct TearingFile {
        bytes: Arc<Mutex<Vec<u8>>>,
        appends: usize,
        tear_on: Option<usize>,
        truncate_fails: bool,
    }

    impl JournalFile for TearingFile {
        fn append(&mut self, data: &[u8]) -> io::Result<()> {
            self.appends += 1;
            if self.tear_on == Some(self.appends) {
                self.bytes.lock().extend_from_slice(&data[..data.len() / 2]);
                return Err(io::Error::other("disk full"));
            }
            self.bytes.lock().extend_from_slice(data);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn size(&self) -> io::Result<u64> {
            Ok(self.bytes.lock().len() as u64)
        }

        fn truncate(&mut self, size: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::other("read-only filesystem"));
            }
            self.bytes.lock().truncate(size as usize);
            Ok(())
        }
    }

    #[test]
    fn torn_append_is_truncated_away() {
        let file = TearingFile {
            tear_on: Some(2),
            ..TearingFile::default()
        };
        let bytes = Arc::clone(&file.bytes);
        let mut journal = FileJournal::with_file(Path::new("torn.log"), Box::new(file)).unwrap();

        journal.append(&entry(1)).unwrap();
        assert!(matches!(journal.append(&entry(2)), Err(StoreError::Io(_))));
        journal.append(&entry(3)).unwrap();

        assert_eq!(journal.len(), 2);
        assert!(!journal.is_poisoned());
        let entries = CommitEntry::decode_frames(&bytes.lock()).unwrap();
        assert_eq!(entries, vec![entry(1), entry(3)]);
    }

    #[test]
    fn failed_truncate_poisons_journal() {
        let file = TearingFile {
            tear_on: Some(1),
            truncate_fails: true,
            ..TearingFile::default()
        };
        let mut journal = FileJournal::with_file(Path::new("torn.log"), Box::new(file)).unwrap();

        assert!(journal.append(&entry(1)).is_err());
        assert!(journal.is_poisoned());
        assert!(matches!(journal.append(&entry(2)), Err(StoreError::Io(_))));
        assert!(journal.is_empty());
    }

    #[test]
    fn replay_of_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let entries = FileJournal::replay(&dir.path().join("absent.log")).unwrap();
        assert!(entries.is_empty());
    }
}
