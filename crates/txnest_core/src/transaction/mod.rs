//! Nested transactions.
//!
//! A unit of work either joins the transaction of its caller
//! ([`Propagation::Required`](crate::Propagation::Required)) or opens a new
//! physical transaction
//! ([`Propagation::RequiresNew`](crate::Propagation::RequiresNew)). Errors
//! that cross a boundary mark the physical transaction rollback-only unless
//! the boundary lists their kind in `no_rollback_for`; a physical boundary
//! that finds its transaction doomed rolls back.

mod context;
mod coordinator;
mod handle;

pub use coordinator::{Outcome, TransactionCoordinator};
pub use handle::Tx;
