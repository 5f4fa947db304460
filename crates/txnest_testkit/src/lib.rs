//! # txnest Testkit
//!
//! Test utilities for txnest.
//!
//! This crate provides:
//! - Coordinator fixtures with in-memory or file-backed journals
//! - A small serial/book catalog built from nested units of work
//! - Fault-injecting journals and event sinks
//! - Property-based test generators using proptest
//! - One-time tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txnest_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_coordinator() {
//!     with_coordinator(|c| {
//!         c.run(&TransactionConfig::required(), |tx| {
//!             catalog::create_serial(tx, 1, "Lost", 8)
//!         })
//!         .unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod faults;
pub mod fixtures;
pub mod generators;
mod logging;

pub use logging::init_tracing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::catalog;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use txnest_core::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
