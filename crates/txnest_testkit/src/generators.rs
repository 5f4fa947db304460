//! Property-based test generators using proptest.
//!
//! Provides strategies for generating staged write sequences, flush modes
//! and nested unit-of-work shapes.

use crate::catalog;
use proptest::prelude::*;
use std::collections::BTreeMap;
use txnest_core::{FlushMode, Propagation, Record, Tx, WriteBuffer};

/// A single staged mutation against the serial table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Put serial `id` with `rating`.
    Put {
        /// Record ID.
        id: u64,
        /// Rating, always within the catalog's valid range.
        rating: i64,
    },
    /// Delete serial `id`.
    Delete {
        /// Record ID.
        id: u64,
    },
}

impl WriteOp {
    fn record(id: u64, rating: i64) -> Record {
        catalog::serial(id, "Generated", rating)
    }

    /// Stages the operation in a transaction.
    pub fn stage(&self, tx: &mut Tx<'_>) {
        match *self {
            WriteOp::Put { id, rating } => tx.put(catalog::SERIAL, Self::record(id, rating)),
            WriteOp::Delete { id } => tx.delete(catalog::SERIAL, id),
        }
    }

    /// Stages the operation in a bare write buffer.
    pub fn stage_in(&self, buffer: &mut WriteBuffer) {
        match *self {
            WriteOp::Put { id, rating } => buffer.put(catalog::SERIAL, Self::record(id, rating)),
            WriteOp::Delete { id } => buffer.delete(catalog::SERIAL, id.into()),
        }
    }

    /// Applies the operation to a last-write-wins model.
    pub fn apply_to_model(&self, model: &mut BTreeMap<u64, Option<i64>>) {
        match *self {
            WriteOp::Put { id, rating } => {
                model.insert(id, Some(rating));
            }
            WriteOp::Delete { id } => {
                model.insert(id, None);
            }
        }
    }
}

/// Strategy for a single write against a small ID space, so keys collide.
pub fn write_op_strategy() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        3 => (1u64..8, 0i64..=10).prop_map(|(id, rating)| WriteOp::Put { id, rating }),
        1 => (1u64..8).prop_map(|id| WriteOp::Delete { id }),
    ]
}

/// Strategy for a sequence of writes.
pub fn write_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_op_strategy(), 0..=max_len)
}

/// Strategy for flush modes.
pub fn flush_mode_strategy() -> impl Strategy<Value = FlushMode> {
    prop_oneof![
        Just(FlushMode::Always),
        Just(FlushMode::Auto),
        Just(FlushMode::Commit),
        Just(FlushMode::Manual),
    ]
}

/// Strategy for propagation modes.
pub fn propagation_strategy() -> impl Strategy<Value = Propagation> {
    prop_oneof![Just(Propagation::Required), Just(Propagation::RequiresNew)]
}

/// How a nested unit of work ends, as seen by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerEnding {
    /// Returns `Ok`.
    Succeeds,
    /// Fails; the caller propagates the error.
    FailsPropagated,
    /// Fails; the caller swallows the error.
    FailsSwallowed,
}

/// Strategy for nested unit-of-work endings.
pub fn inner_ending_strategy() -> impl Strategy<Value = InnerEnding> {
    prop_oneof![
        Just(InnerEnding::Succeeds),
        Just(InnerEnding::FailsPropagated),
        Just(InnerEnding::FailsSwallowed),
    ]
}
