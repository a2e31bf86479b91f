//! Connections.
//!
//! A [`Connection`] is a handle onto a shared [`Database`]. It runs
//! statements in autocommit mode unless an explicit transaction is open, and
//! it may be used from several threads: while one thread has an explicit
//! transaction open, other threads wait (up to the busy timeout) for it to
//! end.
//!
//! ## Locking
//!
//! - A read statement takes the shared lock for its duration, or until the
//!   end of the explicit transaction it runs in.
//! - A write statement takes the write lock. Inside a deferred transaction
//!   that already read, the shared lock is upgraded and the write starts on
//!   top of the latest commit.
//! - Statement failures inside an explicit transaction undo only the failed
//!   statement.
//! - A corruption error poisons the connection: its transaction is rolled
//!   back and every later call fails with the same error until it is closed.

use crate::config::{Config, JournalMode};
use crate::cursor::{Cursor, ScalarStatement};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::files::MEMORY_PATH;
use crate::lock::LockState;
use crate::pager::{PagerStats, ReadView, WriteTxn};
use crate::sql::{parse, parse_one, Parsed, Statement, TransactionKind};
use crate::types::{ConnectionId, RowId};
use crate::value::Value;
use crate::vm::{Access, Env, Outcome, Program};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, info, warn};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

enum Txn {
    Idle,
    /// Holds the shared lock.
    Read(ReadView),
    /// Holds the write lock.
    Write(WriteTxn),
}

struct Inner {
    closed: bool,
    txn: Txn,
    /// Thread that opened the explicit transaction.
    owner: Option<ThreadId>,
    last_insert_rowid: RowId,
    changes: u64,
    poisoned: Option<DbError>,
}

/// A connection to a database.
pub struct Connection {
    id: ConnectionId,
    db: Arc<Database>,
    inner: Mutex<Inner>,
    released: Condvar,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.db.path())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens (creating if needed) the database at `path` with default
    /// configuration.
    ///
    /// `key` is the passphrase of an encrypted database; `None` or an empty
    /// string opens an unencrypted one. A wrong or missing key fails with
    /// [`DbError::Corruption`].
    pub fn open(path: impl AsRef<Path>, key: Option<&str>) -> DbResult<Self> {
        Self::open_with_config(path, key, Config::default())
    }

    /// Opens the database at `path` with the given configuration.
    ///
    /// Configuration only takes effect for the first connection to a file;
    /// later connections share its database.
    pub fn open_with_config(path: impl AsRef<Path>, key: Option<&str>, config: Config) -> DbResult<Self> {
        let path = path.as_ref();
        if !config.create_if_missing && path.as_os_str() != MEMORY_PATH && !path.exists() {
            return Err(DbError::misuse(format!(
                "database {} does not exist",
                path.display()
            )));
        }
        let db = Database::attach(Some(path), key, &config)?;
        Ok(Self::wrap(db))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(MEMORY_PATH, None)
    }

    fn wrap(db: Arc<Database>) -> Self {
        let id = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
        info!(
            connection = %id,
            path = ?db.path(),
            encrypted = db.pager().is_encrypted(),
            journal_mode = db.pager().journal_mode().as_str(),
            "connection opened"
        );
        Self {
            id,
            db,
            inner: Mutex::new(Inner {
                closed: false,
                txn: Txn::Idle,
                owner: None,
                last_insert_rowid: 0,
                changes: 0,
                poisoned: None,
            }),
            released: Condvar::new(),
        }
    }

    /// Process-unique identifier, used in log output.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs one or more `;`-separated statements and returns the number of
    /// rows changed by the last data-modifying one.
    ///
    /// `params` bind to `?` placeholders; missing trailing parameters are
    /// `NULL`. Parameters can only be bound when `sql` holds one statement.
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let mut inner = self.enter()?;
        let statements = parse(sql)?;
        if statements.len() > 1 && !params.is_empty() {
            return Err(DbError::misuse(
                "parameters can only be bound to a single statement",
            ));
        }
        let mut changes = 0;
        for parsed in &statements {
            if let Some(count) = self.step(&mut inner, parsed, params)?.changes {
                changes = count;
            }
        }
        Ok(changes)
    }

    /// Runs a single statement and returns its rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> DbResult<Cursor> {
        let mut inner = self.enter()?;
        let parsed = parse_one(sql)?;
        let outcome = self.step(&mut inner, &parsed, params)?;
        Ok(Cursor::new(outcome.columns, outcome.rows))
    }

    /// Compiles a statement that yields a single value.
    pub fn compile_scalar(&self, sql: &str) -> DbResult<ScalarStatement<'_>> {
        drop(self.enter()?);
        let parsed = parse_one(sql)?;
        if !parsed.statement.is_read_only() {
            return Err(DbError::misuse("scalar statements must not modify the database"));
        }
        Ok(ScalarStatement::new(self, sql.to_string()))
    }

    /// Starts an explicit transaction that holds the write lock.
    ///
    /// `exclusive` corresponds to `BEGIN EXCLUSIVE`, otherwise
    /// `BEGIN IMMEDIATE`.
    pub fn begin_transaction(&self, exclusive: bool) -> DbResult<()> {
        let mut inner = self.enter()?;
        let kind = if exclusive {
            TransactionKind::Exclusive
        } else {
            TransactionKind::Immediate
        };
        self.begin(&mut inner, kind)
    }

    /// Commits the explicit transaction.
    pub fn commit(&self) -> DbResult<()> {
        let mut inner = self.enter()?;
        self.finish(&mut inner, true)
    }

    /// Rolls back the explicit transaction.
    pub fn rollback(&self) -> DbResult<()> {
        let mut inner = self.enter()?;
        self.finish(&mut inner, false)
    }

    /// Runs `f` inside a transaction, committing on success and rolling back
    /// on error.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> DbResult<T>) -> DbResult<T> {
        self.begin_transaction(false)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback() {
                    warn!(connection = %self.id, error = %rollback, "rollback after failed transaction");
                }
                Err(err)
            }
        }
    }

    /// Returns true while an explicit transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.lock().owner.is_some()
    }

    /// Switches the database to write-ahead logging.
    ///
    /// Returns false when WAL is not available: for in-memory and encrypted
    /// databases, and when [`Config::wal_allowed`] is off.
    pub fn enable_write_ahead_logging(&self) -> DbResult<bool> {
        let mut inner = self.enter()?;
        self.switch_journal(&mut inner, JournalMode::Wal)
    }

    /// Switches the database back to the rollback journal, checkpointing the
    /// log first.
    pub fn disable_write_ahead_logging(&self) -> DbResult<()> {
        let mut inner = self.enter()?;
        self.switch_journal(&mut inner, JournalMode::Delete).map(|_| ())
    }

    /// Current journal mode of the database.
    #[must_use]
    pub fn journal_mode(&self) -> JournalMode {
        self.db.pager().journal_mode()
    }

    /// Copies the WAL into the database file. Waits for other connections'
    /// transactions to finish. Returns the number of frames copied.
    pub fn checkpoint(&self) -> DbResult<u64> {
        let mut inner = self.enter()?;
        self.checkpoint_locked(&mut inner)
    }

    /// Row id of the last successful insert on this connection.
    #[must_use]
    pub fn last_insert_rowid(&self) -> RowId {
        self.inner.lock().last_insert_rowid
    }

    /// Rows changed by the last data-modifying statement.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.inner.lock().changes
    }

    /// The schema version number kept for the application.
    pub fn user_version(&self) -> DbResult<i32> {
        let version = self
            .query("PRAGMA user_version", &[])?
            .next()
            .and_then(|row| row.integer(0))
            .unwrap_or(0);
        i32::try_from(version).map_err(|_| DbError::malformed("user_version out of range"))
    }

    /// Sets the application schema version.
    pub fn set_user_version(&self, version: i32) -> DbResult<()> {
        self.execute(&format!("PRAGMA user_version = {version}"), &[])
            .map(|_| ())
    }

    /// Snapshot of the database's lock manager.
    #[must_use]
    pub fn lock_state(&self) -> LockState {
        self.db.locks().state()
    }

    /// Pager counters.
    #[must_use]
    pub fn stats(&self) -> PagerStats {
        self.db.pager().stats()
    }

    /// Returns true when the database pages are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.db.pager().is_encrypted()
    }

    /// File path of the database, `None` in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.db.path()
    }

    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Closes the connection, rolling back any open transaction. The last
    /// connection to a database checkpoints the WAL and releases the file.
    ///
    /// Closing twice is a no-op; every other call on a closed connection
    /// fails with [`DbError::Closed`].
    pub fn close(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        if inner.owner.is_some() || !matches!(inner.txn, Txn::Idle) {
            debug!(connection = %self.id, "rolling back open transaction on close");
        }
        let rolled_back = self.end_txn(&mut inner, false);
        inner.owner = None;
        inner.closed = true;
        drop(inner);
        self.released.notify_all();
        let detached = self.db.detach();
        info!(connection = %self.id, "connection closed");
        rolled_back.and(detached)
    }

    /// Locks the connection state for the calling thread, waiting while
    /// another thread owns an explicit transaction.
    fn enter(&self) -> DbResult<MutexGuard<'_, Inner>> {
        let me = thread::current().id();
        let config = self.db.config();
        let mut inner = self.inner.lock();
        let start = Instant::now();
        loop {
            if inner.closed {
                return Err(DbError::Closed);
            }
            match inner.owner {
                Some(owner) if owner != me => {}
                _ => break,
            }
            let waited = start.elapsed();
            if waited >= config.busy_timeout {
                return Err(DbError::LockTimeout {
                    mode: "transaction",
                    waited,
                });
            }
            let slice = config.busy_poll_interval.min(config.busy_timeout - waited);
            self.released.wait_for(&mut inner, slice);
        }
        if let Some(err) = &inner.poisoned {
            return Err(err.replay());
        }
        Ok(inner)
    }

    fn step(&self, inner: &mut Inner, parsed: &Parsed, params: &[Value]) -> DbResult<Outcome> {
        let result = self.run(inner, parsed, params);
        if let Err(err) = &result {
            if err.is_corruption() {
                warn!(connection = %self.id, error = %err, "connection poisoned");
                if let Err(rollback) = self.end_txn(inner, false) {
                    warn!(connection = %self.id, error = %rollback, "rollback failed");
                }
                self.release_owner(inner);
                inner.poisoned = Some(err.replay());
            }
        }
        result
    }

    fn run(&self, inner: &mut Inner, parsed: &Parsed, params: &[Value]) -> DbResult<Outcome> {
        if params.len() > parsed.param_count {
            return Err(DbError::misuse(format!(
                "statement takes {} parameters but {} were bound",
                parsed.param_count,
                params.len()
            )));
        }
        match &parsed.statement {
            Statement::Begin(kind) => return self.begin(inner, *kind).map(|()| Outcome::default()),
            Statement::Commit => return self.finish(inner, true).map(|()| Outcome::default()),
            Statement::Rollback => return self.finish(inner, false).map(|()| Outcome::default()),
            Statement::Pragma(p) if p.name == "journal_mode" => {
                return self.journal_mode_pragma(inner, p.value.as_deref());
            }
            Statement::Pragma(p) if p.name == "wal_checkpoint" => {
                let frames = i64::try_from(self.checkpoint_locked(inner)?).unwrap_or(i64::MAX);
                return Ok(Outcome {
                    columns: vec!["busy".into(), "log".into(), "checkpointed".into()],
                    rows: vec![vec![
                        Value::Integer(0),
                        Value::Integer(frames),
                        Value::Integer(frames),
                    ]],
                    ..Outcome::default()
                });
            }
            _ => {}
        }

        let autocommit = inner.owner.is_none();
        if parsed.statement.is_read_only() {
            self.begin_read(inner)?;
        } else {
            self.begin_write(inner)?;
        }
        let mut bound = params.to_vec();
        bound.resize(parsed.param_count, Value::Null);
        let result = self.run_in_txn(inner, parsed, &bound);
        if autocommit {
            let ended = self.end_txn(inner, result.is_ok());
            let outcome = result?;
            ended?;
            return Ok(outcome);
        }
        result
    }

    fn run_in_txn(&self, inner: &mut Inner, parsed: &Parsed, params: &[Value]) -> DbResult<Outcome> {
        let env = Env {
            params,
            last_insert_rowid: inner.last_insert_rowid,
            changes: inner.changes,
        };
        let outcome = match &mut inner.txn {
            Txn::Read(view) => self.execute_program(&mut Access::Read(&*view), parsed, &env)?,
            Txn::Write(tx) => {
                let savepoint = tx.savepoint();
                match self.execute_program(&mut Access::Write(&mut *tx), parsed, &env) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tx.restore(savepoint);
                        return Err(err);
                    }
                }
            }
            Txn::Idle => return Err(DbError::misuse("statement run outside a transaction")),
        };
        if let Some(changes) = outcome.changes {
            inner.changes = changes;
        }
        if let Some(rowid) = outcome.last_insert_rowid {
            inner.last_insert_rowid = rowid;
        }
        Ok(outcome)
    }

    fn execute_program(&self, access: &mut Access<'_>, parsed: &Parsed, env: &Env<'_>) -> DbResult<Outcome> {
        let schema = self.db.schema(access)?;
        let program = Program::compile(parsed, &schema)?;
        program.execute(access, &schema, env)
    }

    fn begin(&self, inner: &mut Inner, kind: TransactionKind) -> DbResult<()> {
        if inner.owner.is_some() {
            return Err(DbError::misuse("cannot start a transaction within a transaction"));
        }
        if matches!(kind, TransactionKind::Immediate | TransactionKind::Exclusive) {
            self.begin_write(inner)?;
        }
        inner.owner = Some(thread::current().id());
        debug!(connection = %self.id, ?kind, "transaction started");
        Ok(())
    }

    fn finish(&self, inner: &mut Inner, commit: bool) -> DbResult<()> {
        if inner.owner.is_none() {
            return Err(DbError::misuse(if commit {
                "cannot commit - no transaction is active"
            } else {
                "cannot rollback - no transaction is active"
            }));
        }
        let result = self.end_txn(inner, commit);
        self.release_owner(inner);
        debug!(connection = %self.id, commit, ok = result.is_ok(), "transaction finished");
        result
    }

    fn release_owner(&self, inner: &mut Inner) {
        if inner.owner.take().is_some() {
            self.released.notify_all();
        }
    }

    fn begin_read(&self, inner: &mut Inner) -> DbResult<()> {
        if matches!(inner.txn, Txn::Idle) {
            self.db.locks().acquire_shared()?;
            inner.txn = Txn::Read(self.db.pager().snapshot());
        }
        Ok(())
    }

    fn begin_write(&self, inner: &mut Inner) -> DbResult<()> {
        let locks = self.db.locks();
        match inner.txn {
            Txn::Write(_) => return Ok(()),
            Txn::Read(_) => {
                locks.acquire_write(true)?;
                inner.txn = Txn::Write(self.db.pager().begin_write());
                locks.release_shared();
            }
            Txn::Idle => {
                locks.acquire_write(false)?;
                inner.txn = Txn::Write(self.db.pager().begin_write());
            }
        }
        Ok(())
    }

    /// Ends the current transaction and releases its lock.
    fn end_txn(&self, inner: &mut Inner, commit: bool) -> DbResult<()> {
        let locks = self.db.locks();
        match std::mem::replace(&mut inner.txn, Txn::Idle) {
            Txn::Idle => Ok(()),
            Txn::Read(view) => {
                drop(view);
                locks.release_shared();
                Ok(())
            }
            Txn::Write(tx) => {
                let result = if commit { self.commit_write(tx) } else { Ok(()) };
                locks.release_write();
                result
            }
        }
    }

    /// Commits `tx` and runs an automatic checkpoint once the WAL has grown
    /// past the configured number of frames. The write lock is still held.
    fn commit_write(&self, tx: WriteTxn) -> DbResult<()> {
        let dirty = tx.is_dirty();
        let pager = self.db.pager();
        let frames = pager.commit(tx)?;
        let limit = self.db.config().wal_autocheckpoint as u64;
        if dirty && limit > 0 && frames >= limit && self.db.locks().try_begin_checkpoint(true) {
            let result = pager.checkpoint();
            self.db.locks().end_checkpoint();
            match result {
                Ok(copied) => debug!(connection = %self.id, frames = copied, "automatic checkpoint"),
                Err(err) => warn!(connection = %self.id, error = %err, "automatic checkpoint failed"),
            }
        }
        Ok(())
    }

    fn checkpoint_locked(&self, inner: &mut Inner) -> DbResult<u64> {
        if !matches!(inner.txn, Txn::Idle) {
            return Err(DbError::misuse("cannot checkpoint within a transaction"));
        }
        if self.db.pager().journal_mode() != JournalMode::Wal {
            return Ok(0);
        }
        let pager = self.db.pager();
        self.db.locks().with_exclusive(false, || pager.checkpoint())
    }

    /// Switches the journal mode; returns whether `target` is now in force.
    fn switch_journal(&self, inner: &mut Inner, target: JournalMode) -> DbResult<bool> {
        if inner.owner.is_some() || !matches!(inner.txn, Txn::Idle) {
            return Err(DbError::misuse("cannot change journal mode within a transaction"));
        }
        let pager = self.db.pager();
        if pager.journal_mode() == target {
            return Ok(true);
        }
        if target == JournalMode::Wal {
            let refused = if !pager.is_persistent() {
                Some("in-memory database")
            } else if pager.is_encrypted() {
                Some("encrypted database")
            } else if !self.db.config().wal_allowed {
                Some("disabled by configuration")
            } else {
                None
            };
            if let Some(reason) = refused {
                info!(connection = %self.id, reason, "write-ahead logging not enabled");
                return Ok(false);
            }
        }
        let locks = self.db.locks();
        locks.with_exclusive(false, || {
            pager.set_journal_mode(target)?;
            locks.set_wal(target == JournalMode::Wal);
            Ok(())
        })?;
        info!(connection = %self.id, mode = target.as_str(), "journal mode switched");
        Ok(true)
    }

    fn journal_mode_pragma(&self, inner: &mut Inner, value: Option<&str>) -> DbResult<Outcome> {
        if let Some(value) = value {
            let target = match value.to_ascii_lowercase().as_str() {
                "wal" => JournalMode::Wal,
                "delete" => JournalMode::Delete,
                other => {
                    return Err(DbError::compile(format!("unsupported journal mode: {other}")))
                }
            };
            self.switch_journal(inner, target)?;
        }
        Ok(Outcome {
            columns: vec!["journal_mode".into()],
            rows: vec![vec![Value::from(self.journal_mode().as_str())]],
            ..Outcome::default()
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(connection = %self.id, error = %err, "error while closing connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query(&format!("SELECT count(*) FROM {table}"), &[])
            .unwrap()
            .next()
            .unwrap()
            .integer(0)
            .unwrap()
    }

    #[test]
    fn autocommit_statements_are_durable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.db");
        {
            let conn = Connection::open(&path, None).unwrap();
            conn.execute("CREATE TABLE t(x); INSERT INTO t VALUES (1); INSERT INTO t VALUES (2)", &[])
                .unwrap();
            assert_eq!(conn.last_insert_rowid(), 2);
            assert_eq!(conn.changes(), 1);
        }
        let conn = Connection::open(&path, None).unwrap();
        assert_eq!(count(&conn, "t"), 2);
    }

    #[test]
    fn rollback_discards_explicit_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t(x)", &[]).unwrap();
        conn.begin_transaction(false).unwrap();
        assert!(conn.in_transaction());
        conn.execute("INSERT INTO t VALUES (?)", &[Value::Integer(1)]).unwrap();
        assert_eq!(count(&conn, "t"), 1);
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn, "t"), 0);
    }

    #[test]
    fn sql_transaction_control() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t(x)", &[]).unwrap();
        conn.execute("BEGIN; INSERT INTO t VALUES (1); COMMIT", &[]).unwrap();
        assert_eq!(count(&conn, "t"), 1);

        let err = conn.execute("COMMIT", &[]).unwrap_err();
        assert!(err.to_string().contains("no transaction is active"));
        conn.execute("BEGIN", &[]).unwrap();
        let err = conn.execute("BEGIN", &[]).unwrap_err();
        assert!(err.to_string().contains("within a transaction"));
        conn.execute("ROLLBACK", &[]).unwrap();
    }

    #[test]
    fn failed_statement_keeps_the_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t(x UNIQUE)", &[]).unwrap();
        conn.transaction(|c| {
            c.execute("INSERT INTO t VALUES (1)", &[])?;
            assert!(c.execute("INSERT INTO t VALUES (2), (1)", &[]).is_err());
            c.execute("INSERT INTO t VALUES (3)", &[])
        })
        .unwrap();
        let values: Vec<i64> = conn
            .query("SELECT x FROM t ORDER BY x", &[])
            .unwrap()
            .filter_map(|row| row.integer(0))
            .collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn transaction_helper_rolls_back_on_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t(x)", &[]).unwrap();
        let result: DbResult<()> = conn.transaction(|c| {
            c.execute("INSERT INTO t VALUES (1)", &[])?;
            Err(DbError::misuse("stop"))
        });
        assert!(result.is_err());
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn, "t"), 0);
    }

    #[test]
    fn parameters_are_checked() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t(a, b)", &[]).unwrap();
        conn.execute("INSERT INTO t VALUES (?, ?)", &[Value::Integer(1)]).unwrap();
        let row = conn.query("SELECT a, b FROM t", &[]).unwrap().next().unwrap();
        assert_eq!(row.values(), &[Value::Integer(1), Value::Null]);
        let err = conn
            .execute("INSERT INTO t VALUES (?, ?)", &[Value::Integer(1), Value::Integer(2), Value::Integer(3)])
            .unwrap_err();
        assert!(matches!(err, DbError::Misuse { .. }));
    }

    #[test]
    fn huge_parameter_numbers_fail_to_compile() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.query("SELECT ?9999999999", &[]).unwrap_err();
        assert!(matches!(err, DbError::SqlCompile { .. }));
        let row = conn.query("SELECT ?32766", &[]).unwrap().next().unwrap();
        assert_eq!(row.values(), &[Value::Null]);
    }

    #[test]
    fn closed_connection_refuses_work() {
        let conn = Connection::open_in_memory().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        assert!(matches!(conn.execute("SELECT 1", &[]), Err(DbError::Closed)));
    }

    #[test]
    fn user_version_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(conn.user_version().unwrap(), 0);
        conn.set_user_version(7).unwrap();
        assert_eq!(conn.user_version().unwrap(), 7);
        conn.set_user_version(-2).unwrap();
        assert_eq!(conn.user_version().unwrap(), -2);
    }

    #[test]
    fn wal_is_refused_in_memory() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!conn.enable_write_ahead_logging().unwrap());
        assert_eq!(conn.journal_mode(), JournalMode::Delete);
    }

    #[test]
    fn closed_handle_does_not_keep_the_file_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        let first = Connection::open(&path, None).unwrap();
        first.execute("CREATE TABLE t(x); INSERT INTO t VALUES (1)", &[]).unwrap();
        first.close().unwrap();

        let second = Connection::open(&path, None).unwrap();
        assert_eq!(count(&second, "t"), 1);
        assert!(matches!(first.execute("SELECT 1", &[]), Err(DbError::Closed)));
        second.close().unwrap();
        assert!(crate::database::delete_database_files(&path).unwrap());
    }

    #[test]
    fn wal_database_reopens_after_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen-wal.db");
        let config = Config::default().wal_allowed(true);
        let first = Connection::open_with_config(&path, None, config.clone()).unwrap();
        assert!(first.enable_write_ahead_logging().unwrap());
        first.execute("CREATE TABLE t(x); INSERT INTO t VALUES (1), (2)", &[]).unwrap();
        first.close().unwrap();
        assert!(!crate::files::wal_path(&path).exists());

        let second = Connection::open_with_config(&path, None, config).unwrap();
        assert_eq!(second.journal_mode(), JournalMode::Wal);
        assert_eq!(count(&second, "t"), 2);
    }

    #[test]
    fn journal_mode_pragma_switches_and_reports() {
        let dir = tempdir().unwrap();
        let config = Config::default().wal_allowed(true);
        let conn = Connection::open_with_config(dir.path().join("j.db"), None, config).unwrap();
        let mode = conn.query("PRAGMA journal_mode=WAL", &[]).unwrap().next().unwrap();
        assert_eq!(mode.text(0).as_deref(), Some("wal"));
        assert!(conn.lock_state().wal);
        conn.execute("CREATE TABLE t(x); INSERT INTO t VALUES (1)", &[]).unwrap();
        assert!(conn.stats().wal_frames > 0);
        let row = conn.query("PRAGMA wal_checkpoint", &[]).unwrap().next().unwrap();
        assert!(row.integer(2).unwrap() > 0);
        assert_eq!(conn.stats().wal_frames, 0);
        conn.disable_write_ahead_logging().unwrap();
        assert_eq!(conn.journal_mode(), JournalMode::Delete);
        assert!(!conn.lock_state().wal);
        assert_eq!(count(&conn, "t"), 1);
    }

    #[test]
    fn other_threads_wait_for_an_explicit_transaction() {
        let config = Config::default().busy_timeout(Duration::from_millis(100));
        let conn = Connection::open_with_config(MEMORY_PATH, None, config).unwrap();
        conn.execute("CREATE TABLE t(x)", &[]).unwrap();
        conn.begin_transaction(false).unwrap();
        thread::scope(|s| {
            let err = s
                .spawn(|| conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap_err())
                .join()
                .unwrap();
            assert!(err.is_busy());
        });
        conn.commit().unwrap();
        thread::scope(|s| {
            s.spawn(|| conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap());
        });
        assert_eq!(count(&conn, "t"), 1);
    }
}
