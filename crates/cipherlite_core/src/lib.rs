//! # CipherLite Core
//!
//! Embeddable SQL engine for CipherLite.
//!
//! This crate provides:
//! - A page store with an optional AES-GCM page codec
//! - Rollback-journal and write-ahead-log durability
//! - B-tree tables and a SQL compiler/executor for a practical subset of SQL
//! - `fts3`/`fts4` full-text tables with pluggable tokenizers, Snowball
//!   stemmers, and the `ftsrank` relevance function
//! - Connections that share a database within the process, with
//!   reader/writer locking
//!
//! ## Example
//!
//! ```rust
//! use cipherlite_core::{Connection, Value};
//!
//! let conn = Connection::open_in_memory().unwrap();
//! conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)", &[]).unwrap();
//! conn.execute("INSERT INTO t(name) VALUES (?)", &[Value::from("one")]).unwrap();
//! let name = conn.compile_scalar("SELECT name FROM t WHERE id = 1").unwrap();
//! assert_eq!(name.evaluate().unwrap().as_deref(), Some("one"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod btree;
mod checksum;
mod config;
mod connection;
mod crypto;
mod cursor;
mod database;
mod error;
mod files;
pub mod fts;
mod helper;
mod lock;
mod pager;
mod record;
mod schema;
mod sql;
mod types;
mod value;
mod vm;
mod wal;

pub use config::{Config, JournalMode};
pub use connection::Connection;
pub use crypto::has_codec;
pub use cursor::{Cursor, Row, ScalarStatement};
pub use database::delete_database_files;
pub use error::{CorruptReason, DbError, DbResult};
pub use files::{journal_path, wal_path, MEMORY_PATH};
pub use fts::{register_custom_tokenizer, register_rank_function, register_tokenizer, Language};
pub use helper::{OpenCallbacks, OpenHelper};
pub use lock::LockState;
pub use pager::{Header, PagerStats, PAGE_SIZE};
pub use types::{ConnectionId, RowId};
pub use value::{Affinity, Value};

/// Version of the engine, reported by `sqlite_version()`.
pub const VERSION: &str = vm::ENGINE_VERSION;
