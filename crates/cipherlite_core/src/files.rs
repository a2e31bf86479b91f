//! Database file layout.
//!
//! A database at `<path>` may be accompanied by two sidecar files:
//!
//! ```text
//! <path>            # pages
//! <path>-journal    # rollback journal, present only during a commit
//! <path>-wal        # write-ahead log, present while in WAL mode
//! ```

use crate::error::DbResult;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the rollback journal for `path`.
#[must_use]
pub fn journal_path(path: &Path) -> PathBuf {
    with_suffix(path, "-journal")
}

/// Path of the write-ahead log for `path`.
#[must_use]
pub fn wal_path(path: &Path) -> PathBuf {
    with_suffix(path, "-wal")
}

/// Removes the database file and its sidecars, returning whether the main
/// file existed.
pub(crate) fn remove_database_files(path: &Path) -> DbResult<bool> {
    let mut existed = false;
    for (file, is_main) in [
        (path.to_path_buf(), true),
        (journal_path(path), false),
        (wal_path(path), false),
    ] {
        match std::fs::remove_file(&file) {
            Ok(()) => existed |= is_main,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(existed)
}
