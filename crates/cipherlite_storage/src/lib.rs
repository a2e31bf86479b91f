//! # CipherLite Storage
//!
//! Random-access storage backends for CipherLite.
//!
//! Backends are **opaque byte stores**: they read and write byte ranges and
//! never interpret pages, frames, or journal records. The database file, the
//! rollback journal, and the write-ahead log each sit on their own backend.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, write, append, flush)
//! - No knowledge of page formats, codecs, WAL frames, or B-trees
//! - Must be `Send + Sync` so a database can be shared across threads
//! - CipherLite core owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For `:memory:` databases and tests
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use cipherlite_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(4, b"page").unwrap();
//! assert_eq!(backend.size().unwrap(), 8);
//! assert_eq!(backend.read_at(4, 4).unwrap(), b"page");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
