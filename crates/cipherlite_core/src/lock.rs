//! Reader/writer lock manager shared by all connections of a database.
//!
//! The policy depends on the journal mode:
//!
//! - **Rollback journal**: a writer excludes readers. A reader waits while a
//!   writer holds or waits for the lock; a writer waits for readers to leave.
//! - **WAL**: readers never wait for the writer (they read a snapshot); only
//!   one writer at a time.
//!
//! Checkpoints and journal-mode switches need the database to themselves.
//! Waits poll in slices of `busy_poll_interval` up to `busy_timeout` and
//! then fail with [`DbError::LockTimeout`].

use crate::error::{DbError, DbResult};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Observable state of the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockState {
    /// Number of read locks held.
    pub readers: usize,
    /// Whether a write lock is held.
    pub writer: bool,
    /// Number of writers waiting for readers to leave.
    pub writers_waiting: usize,
    /// Whether a checkpoint is running.
    pub checkpointing: bool,
    /// Whether the WAL policy is in force.
    pub wal: bool,
}

/// Lock manager of one database.
#[derive(Debug)]
pub struct LockManager {
    state: Mutex<LockState>,
    changed: Condvar,
    timeout: Duration,
    poll: Duration,
}

impl LockManager {
    /// Creates a lock manager.
    #[must_use]
    pub fn new(wal: bool, timeout: Duration, poll: Duration) -> Self {
        Self {
            state: Mutex::new(LockState {
                wal,
                ..LockState::default()
            }),
            changed: Condvar::new(),
            timeout,
            poll: poll.max(Duration::from_millis(1)),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LockState {
        *self.state.lock()
    }

    fn wait_until(
        &self,
        mode: &'static str,
        mut ready: impl FnMut(&LockState) -> bool,
    ) -> DbResult<MutexGuard<'_, LockState>> {
        let mut state = self.state.lock();
        if ready(&state) {
            return Ok(state);
        }
        let start = Instant::now();
        debug!(mode, state = ?*state, "waiting for lock");
        loop {
            let waited = start.elapsed();
            if waited >= self.timeout {
                warn!(mode, waited_ms = waited.as_millis() as u64, "lock wait timed out");
                return Err(DbError::LockTimeout { mode, waited });
            }
            let slice = self.poll.min(self.timeout - waited);
            self.changed.wait_for(&mut state, slice);
            if ready(&state) {
                debug!(mode, waited_ms = start.elapsed().as_millis() as u64, "lock granted");
                return Ok(state);
            }
        }
    }

    /// Takes a read lock.
    pub fn acquire_shared(&self) -> DbResult<()> {
        let mut state = self.wait_until("shared", |s| {
            !s.checkpointing && (s.wal || (!s.writer && s.writers_waiting == 0))
        })?;
        state.readers += 1;
        Ok(())
    }

    /// Releases a read lock.
    pub fn release_shared(&self) {
        let mut state = self.state.lock();
        state.readers = state.readers.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Takes the write lock. `holds_shared` says whether the caller already
    /// holds a read lock it is upgrading.
    pub fn acquire_write(&self, holds_shared: bool) -> DbResult<()> {
        let own = usize::from(holds_shared);
        {
            let mut state = self.state.lock();
            state.writers_waiting += 1;
        }
        let result = self.wait_until("write", |s| {
            !s.writer && !s.checkpointing && (s.wal || s.readers <= own)
        });
        let mut state = match result {
            Ok(state) => state,
            Err(err) => {
                let mut state = self.state.lock();
                state.writers_waiting = state.writers_waiting.saturating_sub(1);
                drop(state);
                self.changed.notify_all();
                return Err(err);
            }
        };
        state.writers_waiting = state.writers_waiting.saturating_sub(1);
        state.writer = true;
        Ok(())
    }

    /// Releases the write lock.
    pub fn release_write(&self) {
        let mut state = self.state.lock();
        state.writer = false;
        drop(state);
        self.changed.notify_all();
    }

    /// Claims the database for a checkpoint if nobody else is using it.
    ///
    /// `holds_write` lets the committing writer checkpoint right after its
    /// commit. Never waits.
    pub fn try_begin_checkpoint(&self, holds_write: bool) -> bool {
        let mut state = self.state.lock();
        if state.readers == 0 && !state.checkpointing && state.writer == holds_write {
            state.checkpointing = true;
            true
        } else {
            false
        }
    }

    /// Ends a checkpoint started with [`try_begin_checkpoint`](Self::try_begin_checkpoint).
    pub fn end_checkpoint(&self) {
        let mut state = self.state.lock();
        state.checkpointing = false;
        drop(state);
        self.changed.notify_all();
    }

    /// Waits until the caller is the only user, then runs `f` with the
    /// database to itself. Used for checkpoints and journal-mode switches.
    pub fn with_exclusive<T>(
        &self,
        holds_shared: bool,
        f: impl FnOnce() -> DbResult<T>,
    ) -> DbResult<T> {
        self.acquire_write(holds_shared)?;
        let own = usize::from(holds_shared);
        let drained = self.wait_until("exclusive", |s| s.readers <= own && !s.checkpointing);
        let result = match drained {
            Ok(mut state) => {
                state.checkpointing = true;
                drop(state);
                let result = f();
                self.end_checkpoint();
                result
            }
            Err(err) => Err(err),
        };
        self.release_write();
        result
    }

    /// Switches the locking policy after a journal-mode change.
    pub fn set_wal(&self, wal: bool) {
        self.state.lock().wal = wal;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn manager(wal: bool) -> Arc<LockManager> {
        Arc::new(LockManager::new(
            wal,
            Duration::from_millis(200),
            Duration::from_millis(5),
        ))
    }

    #[test]
    fn rollback_writer_blocks_readers() {
        let locks = manager(false);
        locks.acquire_write(false).unwrap();
        let err = locks.acquire_shared().unwrap_err();
        assert!(err.is_busy());
        locks.release_write();
        locks.acquire_shared().unwrap();
        assert_eq!(locks.state().readers, 1);
    }

    #[test]
    fn rollback_writer_waits_for_readers() {
        let locks = manager(false);
        locks.acquire_shared().unwrap();
        assert!(locks.acquire_write(false).is_err());
        assert_eq!(locks.state().writers_waiting, 0);
        // Upgrading the only read lock succeeds.
        locks.acquire_write(true).unwrap();
        assert!(locks.state().writer);
    }

    #[test]
    fn wal_readers_run_beside_writer() {
        let locks = manager(true);
        locks.acquire_write(false).unwrap();
        locks.acquire_shared().unwrap();
        locks.acquire_shared().unwrap();
        assert_eq!(
            locks.state(),
            LockState {
                readers: 2,
                writer: true,
                writers_waiting: 0,
                checkpointing: false,
                wal: true,
            }
        );
        assert!(locks.acquire_write(false).is_err());
    }

    #[test]
    fn blocked_reader_proceeds_after_release() {
        let locks = Arc::new(LockManager::new(
            false,
            Duration::from_secs(5),
            Duration::from_millis(5),
        ));
        locks.acquire_write(false).unwrap();
        let reader = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire_shared())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());
        locks.release_write();
        reader.join().unwrap().unwrap();
    }

    #[test]
    fn checkpoint_needs_idle_database() {
        let locks = manager(true);
        locks.acquire_shared().unwrap();
        assert!(!locks.try_begin_checkpoint(false));
        locks.release_shared();
        assert!(locks.try_begin_checkpoint(false));
        assert!(locks.acquire_shared().is_err());
        locks.end_checkpoint();
        locks.acquire_shared().unwrap();
    }

    #[test]
    fn exclusive_runs_alone() {
        let locks = manager(true);
        let value = locks
            .with_exclusive(false, || {
                assert!(locks.state().checkpointing);
                Ok(7)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(locks.state(), LockState { wal: true, ..LockState::default() });
    }
}
