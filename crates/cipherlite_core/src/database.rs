//! Shared database state and the process-wide registry.
//!
//! Every connection to the same file shares one [`Database`]: one pager (and
//! with it one page cache, one WAL index, and the advisory file lock), one
//! lock manager, and one schema cache. The registry maps canonical paths to
//! open databases and counts their connections; the last connection to leave
//! shuts the database down. In-memory databases are never shared.

use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::files::{remove_database_files, MEMORY_PATH};
use crate::lock::LockManager;
use crate::pager::{PageRead, Pager};
use crate::schema::{self, Schema};
use crate::vm::Access;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

struct Registered {
    database: Arc<Database>,
    connections: usize,
}

fn registry() -> &'static Mutex<HashMap<PathBuf, Registered>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Registered>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Resolves `path` to the key used by the registry. The file need not exist.
fn canonical(path: &Path) -> DbResult<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }
    let absolute = std::path::absolute(path)?;
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match std::fs::canonicalize(parent) {
            Ok(parent) => Ok(parent.join(name)),
            Err(_) => Ok(absolute),
        },
        _ => Ok(absolute),
    }
}

/// Returns true for the in-memory database name.
pub(crate) fn is_memory_path(path: &Path) -> bool {
    path.as_os_str() == MEMORY_PATH
}

/// An empty passphrase means no key.
fn effective_key(passphrase: Option<&str>) -> Option<&str> {
    passphrase.filter(|p| !p.is_empty())
}

/// State shared by all connections to one database.
pub(crate) struct Database {
    path: Option<PathBuf>,
    pager: Arc<Pager>,
    locks: LockManager,
    config: Config,
    schema: Mutex<Arc<Schema>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("encrypted", &self.pager.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens or joins the database at `path`. `None` (or `":memory:"`)
    /// creates a private in-memory database.
    ///
    /// A connection joining an already open database must present a key that
    /// opens the file.
    pub fn attach(path: Option<&Path>, passphrase: Option<&str>, config: &Config) -> DbResult<Arc<Self>> {
        let passphrase = effective_key(passphrase);
        let Some(path) = path.filter(|p| !is_memory_path(p)) else {
            return Self::create(None, passphrase, config).map(Arc::new);
        };
        let key = canonical(path)?;
        let mut open = registry().lock();
        if let Some(entry) = open.get_mut(&key) {
            entry.database.pager.verify_passphrase(passphrase)?;
            entry.connections += 1;
            debug!(path = %key.display(), connections = entry.connections, "joined open database");
            return Ok(Arc::clone(&entry.database));
        }
        let database = Arc::new(Self::create(Some(key.clone()), passphrase, config)?);
        open.insert(
            key,
            Registered {
                database: Arc::clone(&database),
                connections: 1,
            },
        );
        Ok(database)
    }

    fn create(path: Option<PathBuf>, passphrase: Option<&str>, config: &Config) -> DbResult<Self> {
        let pager = Arc::new(Pager::open(path.as_deref(), passphrase, config)?);
        if pager.is_new() {
            let mut tx = pager.begin_write();
            schema::init(&mut tx)?;
            pager.commit(tx)?;
            debug!(path = ?path, "initialized new database");
        }
        let schema = Schema::load(&pager.snapshot())?;
        let wal = pager.journal_mode() == crate::config::JournalMode::Wal;
        Ok(Self {
            path,
            locks: LockManager::new(wal, config.busy_timeout, config.busy_poll_interval),
            pager,
            config: config.clone(),
            schema: Mutex::new(Arc::new(schema)),
        })
    }

    /// Drops one connection's reference. The last one shuts the database down.
    pub fn detach(self: &Arc<Self>) -> DbResult<()> {
        let Some(path) = &self.path else {
            return self.pager.shutdown();
        };
        let mut open = registry().lock();
        let last = match open.get_mut(path) {
            Some(entry) if Arc::ptr_eq(&entry.database, self) => {
                entry.connections = entry.connections.saturating_sub(1);
                entry.connections == 0
            }
            _ => false,
        };
        if !last {
            return Ok(());
        }
        open.remove(path);
        // Shut down before the registry is unlocked so a concurrent opener
        // never finds the file still locked.
        let result = self.pager.shutdown();
        drop(open);
        info!(path = %path.display(), "database closed");
        result
    }

    /// File path, `None` in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The catalog visible to `access`.
    ///
    /// Catalogs of committed snapshots are cached by schema cookie; a write
    /// transaction that changed the schema reloads its own.
    pub fn schema(&self, access: &Access<'_>) -> DbResult<Arc<Schema>> {
        let cookie = access.header().schema_cookie;
        {
            let cached = self.schema.lock();
            if cached.cookie() == cookie {
                return Ok(Arc::clone(&cached));
            }
        }
        let loaded = Arc::new(Schema::load(access)?);
        if matches!(access, Access::Read(_)) {
            *self.schema.lock() = Arc::clone(&loaded);
        }
        Ok(loaded)
    }
}

/// Returns true while a connection to `path` is open in this process.
pub(crate) fn is_open(path: &Path) -> bool {
    canonical(path).is_ok_and(|key| registry().lock().contains_key(&key))
}

/// Removes the database at `path` with its journal and WAL files.
///
/// Returns whether the database file existed. Fails with a misuse error
/// while the database is open in this process.
pub fn delete_database_files(path: impl AsRef<Path>) -> DbResult<bool> {
    let path = path.as_ref();
    if is_memory_path(path) {
        return Ok(false);
    }
    if is_open(path) {
        return Err(DbError::misuse(format!(
            "database {} is still open",
            path.display()
        )));
    }
    remove_database_files(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn connections_to_one_path_share_a_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let config = Config::default();
        let a = Database::attach(Some(&path), None, &config).unwrap();
        let b = Database::attach(Some(&dir.path().join(".").join("shared.db")), None, &config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(is_open(&path));
        assert!(delete_database_files(&path).is_err());

        a.detach().unwrap();
        assert!(is_open(&path));
        b.detach().unwrap();
        assert!(!is_open(&path));
        assert!(delete_database_files(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn memory_databases_are_private() {
        let config = Config::default();
        let a = Database::attach(None, None, &config).unwrap();
        let b = Database::attach(Some(Path::new(MEMORY_PATH)), None, &config).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(a.path().is_none());
        assert!(!a.pager().is_new());
    }

    #[test]
    fn empty_passphrase_means_no_key() {
        assert_eq!(effective_key(Some("")), None);
        assert_eq!(effective_key(Some("k")), Some("k"));
        let a = Database::attach(None, Some(""), &Config::default()).unwrap();
        assert!(!a.pager().is_encrypted());
    }
}
