//! Open-or-create lifecycle for application databases.
//!
//! [`OpenHelper`] opens a database lazily, asks its [`OpenCallbacks`] for
//! the key every time it opens one, and brings the schema to the expected
//! version inside a single write transaction.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::files::MEMORY_PATH;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Application hooks run by [`OpenHelper`].
pub trait OpenCallbacks {
    /// Key for the database, asked for on every open. `None` or an empty
    /// string means no encryption.
    fn password(&self) -> Option<String> {
        None
    }

    /// Runs right after the connection is opened, before any schema work.
    fn on_configure(&self, _connection: &Connection) -> DbResult<()> {
        Ok(())
    }

    /// Creates the schema of a new database.
    fn on_create(&self, connection: &Connection) -> DbResult<()>;

    /// Migrates the schema from `old` to `new`.
    fn on_upgrade(&self, connection: &Connection, old: i32, new: i32) -> DbResult<()>;

    /// Handles a database newer than the application. Fails by default.
    fn on_downgrade(&self, _connection: &Connection, old: i32, new: i32) -> DbResult<()> {
        Err(DbError::misuse(format!(
            "cannot downgrade database from version {old} to {new}"
        )))
    }

    /// Runs once the database is at the expected version.
    fn on_open(&self, _connection: &Connection) -> DbResult<()> {
        Ok(())
    }
}

/// Opens a database on demand and keeps its schema version current.
pub struct OpenHelper<C: OpenCallbacks> {
    path: Option<PathBuf>,
    version: i32,
    config: Config,
    write_ahead_logging: bool,
    callbacks: C,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl<C: OpenCallbacks> std::fmt::Debug for OpenHelper<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHelper")
            .field("path", &self.path)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl<C: OpenCallbacks> OpenHelper<C> {
    /// Creates a helper for the database at `path` (`None` for a fresh
    /// in-memory database on every open) at schema `version`.
    pub fn new(path: Option<&Path>, version: i32, callbacks: C) -> DbResult<Self> {
        if version < 1 {
            return Err(DbError::misuse(format!("version must be >= 1, was {version}")));
        }
        Ok(Self {
            path: path.map(Path::to_path_buf),
            version,
            config: Config::default(),
            write_ahead_logging: false,
            callbacks,
            connection: Mutex::new(None),
        })
    }

    /// Uses `config` for later opens.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Requests write-ahead logging on later opens, where available.
    #[must_use]
    pub fn with_write_ahead_logging(mut self, enabled: bool) -> Self {
        self.write_ahead_logging = enabled;
        self
    }

    /// The application hooks.
    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    /// Schema version the helper maintains.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the open connection, opening and upgrading the database if
    /// there is none.
    pub fn database(&self) -> DbResult<Arc<Connection>> {
        let mut slot = self.connection.lock();
        if let Some(connection) = slot.as_ref().filter(|c| !c.is_closed()) {
            return Ok(Arc::clone(connection));
        }
        let connection = Arc::new(self.open()?);
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Closes the helper's connection. The next [`database`](Self::database)
    /// call opens it again.
    pub fn close(&self) -> DbResult<()> {
        match self.connection.lock().take() {
            Some(connection) => connection.close(),
            None => Ok(()),
        }
    }

    fn open(&self) -> DbResult<Connection> {
        let key = self.callbacks.password();
        let path = self.path.as_deref().unwrap_or(Path::new(MEMORY_PATH));
        let connection = Connection::open_with_config(path, key.as_deref(), self.config.clone())?;
        self.callbacks.on_configure(&connection)?;
        if self.write_ahead_logging {
            connection.enable_write_ahead_logging()?;
        }

        let current = connection.user_version()?;
        if current != self.version {
            connection.transaction(|c| {
                if current == 0 {
                    self.callbacks.on_create(c)?;
                } else if current < self.version {
                    self.callbacks.on_upgrade(c, current, self.version)?;
                } else {
                    self.callbacks.on_downgrade(c, current, self.version)?;
                }
                c.set_user_version(self.version)
            })?;
            info!(path = ?self.path, from = current, to = self.version, "database schema version set");
        }
        self.callbacks.on_open(&connection)?;
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        passwords: AtomicUsize,
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl OpenCallbacks for Recorder {
        fn password(&self) -> Option<String> {
            self.passwords.fetch_add(1, Ordering::SeqCst);
            None
        }

        fn on_create(&self, connection: &Connection) -> DbResult<()> {
            self.events.lock().push("create".into());
            connection.execute("CREATE TABLE notes(id INTEGER PRIMARY KEY, body TEXT)", &[])?;
            Ok(())
        }

        fn on_upgrade(&self, connection: &Connection, old: i32, new: i32) -> DbResult<()> {
            self.events.lock().push(format!("upgrade {old}->{new}"));
            connection.execute("CREATE TABLE tags(name TEXT)", &[])?;
            Ok(())
        }

        fn on_open(&self, _connection: &Connection) -> DbResult<()> {
            self.events.lock().push("open".into());
            Ok(())
        }
    }

    #[test]
    fn creates_then_upgrades() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.db");

        let helper = OpenHelper::new(Some(path.as_path()), 1, Recorder::default()).unwrap();
        let db = helper.database().unwrap();
        assert_eq!(db.user_version().unwrap(), 1);
        assert!(Arc::ptr_eq(&db, &helper.database().unwrap()));
        helper.close().unwrap();
        assert_eq!(helper.callbacks().events(), vec!["create", "open"]);

        let helper = OpenHelper::new(Some(path.as_path()), 3, Recorder::default()).unwrap();
        let db = helper.database().unwrap();
        assert_eq!(db.user_version().unwrap(), 3);
        db.execute("INSERT INTO tags VALUES ('x')", &[]).unwrap();
        assert_eq!(helper.callbacks().events(), vec!["upgrade 1->3", "open"]);
    }

    #[test]
    fn password_is_asked_on_every_open() {
        let helper = OpenHelper::new(None, 1, Recorder::default()).unwrap();
        helper.database().unwrap();
        helper.close().unwrap();
        helper.database().unwrap();
        assert_eq!(helper.callbacks().passwords.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn downgrade_fails_by_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.db");
        {
            let conn = Connection::open(&path, None).unwrap();
            conn.set_user_version(5).unwrap();
        }
        let helper = OpenHelper::new(Some(path.as_path()), 2, Recorder::default()).unwrap();
        let err = helper.database().unwrap_err();
        assert!(err.to_string().contains("downgrade"));
    }

    #[test]
    fn version_zero_is_rejected() {
        assert!(OpenHelper::new(None, 0, Recorder::default()).is_err());
    }
}
