//! # CipherLite Testkit
//!
//! Test utilities for CipherLite.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - The functional self-test suite with its `ok`/`FAILED` report
//! - Crash image helpers for recovery testing
//! - Fuzz testing harnesses
//! - Load generators for single-connection and concurrent workloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cipherlite_testkit::prelude::*;
//!
//! #[test]
//! fn table_round_trip() {
//!     with_memory_db(|conn| {
//!         conn.execute("CREATE TABLE t(x); INSERT INTO t VALUES ('a')", &[]).unwrap();
//!         assert_eq!(joined_column(conn, "SELECT x FROM t"), ".a");
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod stress;
pub mod suite;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::suite::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use suite::*;
