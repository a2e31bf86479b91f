//! Scratch databases and small query helpers shared by tests.

use cipherlite_core::{Config, Connection, DbResult, Value};
use std::io::Read;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File name used for file-backed fixtures.
pub const DB_FILE: &str = "test.db";

/// A file-backed database in its own temporary directory.
///
/// The directory, and with it the database, `-journal` and `-wal` files,
/// is removed when the fixture drops. Constructors panic on failure since
/// they only run inside tests.
pub struct ScratchDb {
    conn: Connection,
    path: PathBuf,
    _dir: TempDir,
}

impl ScratchDb {
    /// Plaintext database with the default configuration.
    pub fn plain() -> Self {
        Self::with_config(None, Config::default())
    }

    /// Database sealed with `key`.
    pub fn keyed(key: &str) -> Self {
        Self::with_config(Some(key), Config::default())
    }

    /// Database opened with an explicit key and configuration.
    pub fn with_config(key: Option<&str>, config: Config) -> Self {
        let dir = TempDir::new().expect("scratch directory");
        let path = dir.path().join(DB_FILE);
        let conn = Connection::open_with_config(&path, key, config).expect("scratch database");
        Self {
            conn,
            path,
            _dir: dir,
        }
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens another connection to the same file.
    pub fn connect(&self, key: Option<&str>) -> Connection {
        Connection::open(&self.path, key).expect("second connection")
    }
}

impl Deref for ScratchDb {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

/// Runs `f` against a fresh `:memory:` database.
pub fn with_memory_db<R>(f: impl FnOnce(&Connection) -> R) -> R {
    let conn = Connection::open_in_memory().expect("in-memory database");
    f(&conn)
}

/// Concatenates the first column of every row, each prefixed with a dot.
///
/// `NULL` contributes an empty segment. Errors surface as the error text so
/// the result can be compared against an expected string.
pub fn joined_column(conn: &Connection, sql: &str) -> String {
    match conn.query(sql, &[]) {
        Ok(rows) => rows
            .map(|row| format!(".{}", row.text(0).unwrap_or_default()))
            .collect(),
        Err(err) => err.to_string(),
    }
}

/// Returns true unless the file starts with the plaintext magic `SQLite`.
pub fn file_is_encrypted(path: &Path) -> std::io::Result<bool> {
    let mut magic = [0u8; 6];
    std::fs::File::open(path)?.read_exact(&mut magic)?;
    Ok(&magic != b"SQLite")
}

/// Canned data sets.
pub mod scenarios {
    use super::*;

    /// Rows of the ranking scenario: a title and an HTML body.
    pub const PEOPLE: [(&str, &str); 8] = [
        ("Boss", "<html> Adrenaline <b>Junkies</b> Unite </html>"),
        ("User", "<html> Linux Nerds Reunion </html>"),
        ("User", "<html> Penicillin Users Assemble </html>"),
        ("User", "<html> Burp Boss Man Returns </html>"),
        ("User", "<html> Fart Hero Stinks </html>"),
        ("User", "<html> Sneeze Scars Massage </html>"),
        ("User", "<html> Leian Solo Falls </html>"),
        ("Boss", "<html> Bob Boss Unites Jobs Boss </html>"),
    ];

    /// Creates `t(id INTEGER PRIMARY KEY, body TEXT)` holding `count`
    /// rows `"row 0"`, `"row 1"`, ... in one transaction.
    pub fn numbered_rows(conn: &Connection, count: usize) -> DbResult<()> {
        conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, body TEXT)", &[])?;
        conn.transaction(|tx| {
            for i in 0..count {
                tx.execute("INSERT INTO t(body) VALUES (?)", &[Value::from(format!("row {i}"))])?;
            }
            Ok(())
        })
    }

    /// Fills `table` (already created as `fts4(title, name, ...)`) with the
    /// ranking scenario rows.
    pub fn insert_people(conn: &Connection, table: &str) {
        let sql = format!("INSERT INTO {table} VALUES (?, ?)");
        for (title, name) in PEOPLE {
            conn.execute(&sql, &[Value::from(title), Value::from(name)])
                .expect("insert person");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_files_are_plaintext_unless_keyed() {
        let plain = ScratchDb::plain();
        plain.execute("CREATE TABLE t1(x)", &[]).unwrap();
        assert!(!file_is_encrypted(plain.path()).unwrap());

        let sealed = ScratchDb::keyed("hunter2");
        sealed.execute("CREATE TABLE t1(x)", &[]).unwrap();
        assert!(file_is_encrypted(sealed.path()).unwrap());
    }

    #[test]
    fn second_connection_sees_committed_rows() {
        let db = ScratchDb::plain();
        db.execute("CREATE TABLE t(x); INSERT INTO t VALUES (1)", &[]).unwrap();
        let other = db.connect(None);
        assert_eq!(joined_column(&other, "SELECT x FROM t"), ".1");
    }

    #[test]
    fn joined_column_renders_nulls_and_errors() {
        with_memory_db(|conn| {
            conn.execute("CREATE TABLE t1(x); INSERT INTO t1 VALUES ('a'), (NULL), (3)", &[])
                .unwrap();
            assert_eq!(joined_column(conn, "SELECT x FROM t1"), ".a..3");
            assert!(joined_column(conn, "SELECT x FROM missing").contains("missing"));
        });
    }

    #[test]
    fn numbered_rows_are_counted() {
        with_memory_db(|conn| {
            scenarios::numbered_rows(conn, 10).unwrap();
            let count = conn.compile_scalar("SELECT count(*) FROM t").unwrap();
            assert_eq!(count.evaluate().unwrap().as_deref(), Some("10"));
        });
    }
}
