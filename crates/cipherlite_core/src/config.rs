//! Database configuration.

use crate::crypto::has_codec;
use std::time::Duration;

/// Journal mode of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Rollback journal; a writer excludes readers.
    Delete,
    /// Write-ahead log; readers proceed on a snapshot while a writer works.
    Wal,
}

impl JournalMode {
    /// Returns the pragma spelling of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Wal => "wal",
        }
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// How long a statement waits for a lock before failing.
    pub busy_timeout: Duration,

    /// Interval between lock acquisition attempts while waiting.
    pub busy_poll_interval: Duration,

    /// Whether write-ahead logging may be enabled on this database.
    ///
    /// Keyed databases never use WAL regardless of this flag.
    pub wal_allowed: bool,

    /// Number of WAL frames after which a commit attempts a checkpoint
    /// (0 = never).
    pub wal_autocheckpoint: usize,

    /// Whether to sync the journal and database on every commit.
    pub sync_on_commit: bool,

    /// Number of decoded main-file pages kept in the shared page cache.
    pub page_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
            busy_poll_interval: Duration::from_millis(25),
            wal_allowed: !has_codec(),
            wal_autocheckpoint: 1000,
            sync_on_commit: true,
            page_cache_size: 2000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the interval between lock attempts.
    #[must_use]
    pub const fn busy_poll_interval(mut self, interval: Duration) -> Self {
        self.busy_poll_interval = interval;
        self
    }

    /// Sets whether WAL may be enabled.
    #[must_use]
    pub const fn wal_allowed(mut self, value: bool) -> Self {
        self.wal_allowed = value;
        self
    }

    /// Sets the WAL auto-checkpoint threshold in frames.
    #[must_use]
    pub const fn wal_autocheckpoint(mut self, frames: usize) -> Self {
        self.wal_autocheckpoint = frames;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the shared page cache capacity.
    #[must_use]
    pub const fn page_cache_size(mut self, pages: usize) -> Self {
        self.page_cache_size = pages;
        self
    }
}
