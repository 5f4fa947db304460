//! In-process fan-out of commit events.
//!
//! ```rust,ignore
//! let feed = Arc::new(ChangeFeed::new());
//! let coordinator = TransactionCoordinator::new(store).with_event_sink(feed.clone());
//!
//! let receiver = feed.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = receiver.recv() {
//!         println!("committed: {:?}", event);
//!     }
//! });
//! ```

use crate::error::SinkError;
use crate::event::{CommitEvent, EventSink};
use crate::types::SequenceNumber;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Distributes commit events to subscribers and keeps a bounded history.
///
/// The feed:
/// - Only ever sees committed events
/// - Preserves commit order
/// - Supports multiple subscribers
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<CommitEvent>>>,
    history: RwLock<Vec<CommitEvent>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a feed keeping the last 10 000 events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    /// Creates a feed with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Returns a receiver for every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<CommitEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Records an event and forwards it to live subscribers.
    pub fn emit(&self, event: CommitEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        // Dropped receivers are pruned here.
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns up to `limit` events committed after `cursor`.
    #[must_use]
    pub fn poll(&self, cursor: SequenceNumber, limit: usize) -> Vec<CommitEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the sequence of the newest event in history.
    #[must_use]
    pub fn latest_sequence(&self) -> SequenceNumber {
        self.history
            .read()
            .last()
            .map_or(SequenceNumber::default(), |e| e.sequence)
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ChangeFeed {
    fn notify_after_commit(&self, event: &CommitEvent) -> Result<(), SinkError> {
        self.emit(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::types::TransactionId;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn event(seq: u64) -> CommitEvent {
        CommitEvent {
            sequence: SequenceNumber::new(seq),
            txid: TransactionId::new(seq),
            topic: "serial.saved".into(),
            record: Some(Record::new(seq).with("name", "Serial")),
        }
    }

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();

        feed.emit(event(1));

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received, event(1));
    }

    #[test]
    fn multiple_subscribers() {
        let feed = ChangeFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        feed.notify_after_commit(&event(1)).unwrap();

        assert_eq!(rx1.recv().unwrap(), event(1));
        assert_eq!(rx2.recv().unwrap(), event(1));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(event(1));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn poll_from_cursor() {
        let feed = ChangeFeed::new();
        for i in 1..=5 {
            feed.emit(event(i));
        }

        let events = feed.poll(SequenceNumber::new(2), 10);
        let seqs: Vec<_> = events.iter().map(|e| e.sequence.as_u64()).collect();
        assert_eq!(seqs, vec![3, 4, 5]);

        assert_eq!(feed.poll(SequenceNumber::new(0), 2).len(), 2);
    }

    #[test]
    fn history_is_bounded() {
        let feed = ChangeFeed::with_max_history(3);
        for i in 1..=10 {
            feed.emit(event(i));
        }

        assert_eq!(feed.history_len(), 3);
        assert_eq!(feed.poll(SequenceNumber::new(0), 10)[0].sequence.as_u64(), 8);
        assert_eq!(feed.latest_sequence().as_u64(), 10);
    }

    #[test]
    fn threaded_subscribe() {
        let feed = Arc::new(ChangeFeed::new());
        let rx = feed.subscribe();

        let emitter = Arc::clone(&feed);
        let handle = thread::spawn(move || {
            emitter.emit(event(7));
        });

        let received = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(received.sequence.as_u64(), 7);
        handle.join().unwrap();
    }
}
