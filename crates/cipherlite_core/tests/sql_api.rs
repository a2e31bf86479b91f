//! End-to-end tests of the connection API against file databases.

use cipherlite_core::{delete_database_files, Connection, DbError, Value, VERSION};
use std::path::Path;
use std::thread;
use tempfile::tempdir;

fn joined(conn: &Connection, sql: &str) -> String {
    conn.query(sql, &[])
        .unwrap()
        .map(|row| format!(".{}", row.text(0).unwrap_or_default()))
        .collect()
}

fn file_magic(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()[..6].to_vec()
}

#[test]
fn cursor_walks_rows_in_insert_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("csr.db");
    let conn = Connection::open(&path, None).unwrap();
    conn.execute("CREATE TABLE t1(x)", &[]).unwrap();
    conn.execute("INSERT INTO t1 VALUES ('one'), ('two'), ('three')", &[])
        .unwrap();
    assert_eq!(joined(&conn, "SELECT x FROM t1"), ".one.two.three");
    conn.close().unwrap();
    assert_eq!(file_magic(&path), b"SQLite");
}

#[test]
fn mixed_type_scan_counts_every_row() {
    let dir = tempdir().unwrap();
    let conn = Connection::open(dir.path().join("mixed.db"), None).unwrap();
    conn.execute("CREATE TABLE t1(x)", &[]).unwrap();

    let mut expected = String::new();
    conn.execute("BEGIN", &[]).unwrap();
    for _ in 0..1000 {
        conn.execute("INSERT INTO t1 VALUES ('one'), ('two'), ('three')", &[])
            .unwrap();
        expected.push_str(".one.two.three");
    }
    conn.execute("COMMIT", &[]).unwrap();
    assert_eq!(joined(&conn, "SELECT x FROM t1"), expected);

    conn.execute("BEGIN", &[]).unwrap();
    for _ in 0..1000 {
        conn.execute("INSERT INTO t1 VALUES (X'123456'), (X'789ABC'), (X'DEF012')", &[])
            .unwrap();
        conn.execute("INSERT INTO t1 VALUES (45), (46), (47)", &[]).unwrap();
        conn.execute("INSERT INTO t1 VALUES (8.1), (8.2), (8.3)", &[]).unwrap();
        conn.execute("INSERT INTO t1 VALUES (NULL), (NULL), (NULL)", &[]).unwrap();
    }
    conn.execute("COMMIT", &[]).unwrap();
    assert_eq!(conn.query("SELECT x FROM t1", &[]).unwrap().len(), 15000);

    let types: Vec<String> = conn
        .query("SELECT DISTINCT typeof(x) FROM t1 ORDER BY 1", &[])
        .unwrap()
        .filter_map(|row| row.text(0))
        .collect();
    assert_eq!(types, vec!["blob", "integer", "null", "real", "text"]);
}

#[test]
fn rowids_come_back_in_order() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute("CREATE TABLE t(v)", &[]).unwrap();
    for i in 0..500 {
        conn.execute("INSERT INTO t VALUES (?)", &[Value::Integer(i * 7 % 13)])
            .unwrap();
    }
    let rowids: Vec<i64> = conn
        .query("SELECT rowid FROM t", &[])
        .unwrap()
        .filter_map(|row| row.integer(0))
        .collect();
    assert_eq!(rowids, (1..=500).collect::<Vec<_>>());
}

#[test]
fn supplementary_characters_round_trip() {
    let dir = tempdir().unwrap();
    let conn = Connection::open(dir.path().join("supp.db"), None).unwrap();
    conn.execute("CREATE TABLE t1(x)", &[]).unwrap();
    for smiley in ['\u{1F601}', '\u{1F638}'] {
        conn.execute("DELETE FROM t1", &[]).unwrap();
        conn.execute(&format!("INSERT INTO t1 VALUES ('a{smiley}b')"), &[])
            .unwrap();
        assert_eq!(joined(&conn, "SELECT x FROM t1"), format!(".a{smiley}b"));
        let length = conn.compile_scalar("SELECT length(x) FROM t1").unwrap();
        assert_eq!(length.evaluate().unwrap().as_deref(), Some("3"));
    }
}

#[test]
fn scalar_statement_needs_exactly_one_row() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute("CREATE TABLE t(x)", &[]).unwrap();
    let scalar = conn.compile_scalar("SELECT x FROM t WHERE x > ?").unwrap();

    let err = scalar.evaluate_with(&[Value::Integer(0)]).unwrap_err();
    assert!(matches!(err, DbError::NotExactlyOneRow { rows: 0 }));

    conn.execute("INSERT INTO t VALUES (1), (2)", &[]).unwrap();
    assert_eq!(
        scalar.evaluate_with(&[Value::Integer(1)]).unwrap().as_deref(),
        Some("2")
    );
    let err = scalar.evaluate_with(&[Value::Integer(0)]).unwrap_err();
    assert!(matches!(err, DbError::NotExactlyOneRow { rows: 2 }));

    conn.execute("INSERT INTO t VALUES (NULL)", &[]).unwrap();
    let null = conn.compile_scalar("SELECT x FROM t WHERE x IS NULL").unwrap();
    assert_eq!(null.evaluate().unwrap(), None);

    assert!(conn.compile_scalar("DELETE FROM t").is_err());
}

#[test]
fn engine_reports_its_version() {
    let conn = Connection::open_in_memory().unwrap();
    let version = conn.compile_scalar("SELECT sqlite_version()").unwrap();
    assert_eq!(version.evaluate().unwrap().as_deref(), Some(VERSION));
}

#[test]
fn connection_is_usable_from_another_thread() {
    let dir = tempdir().unwrap();
    let conn = Connection::open(dir.path().join("thread.db"), None).unwrap();
    conn.execute("CREATE TABLE t1(x, y)", &[]).unwrap();
    conn.execute("INSERT INTO t1 VALUES (1, 2), (3, 4)", &[]).unwrap();

    let sum = thread::scope(|s| {
        s.spawn(|| {
            conn.compile_scalar("SELECT sum(x+y) FROM t1")
                .unwrap()
                .evaluate()
                .unwrap()
        })
        .join()
        .unwrap()
    });
    assert_eq!(sum.as_deref(), Some("10"));
}

#[test]
fn data_survives_reopen_and_files_can_be_deleted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reopen.db");
    {
        let conn = Connection::open(&path, None).unwrap();
        conn.execute(
            "CREATE TABLE notes(id INTEGER PRIMARY KEY, body TEXT NOT NULL)",
            &[],
        )
        .unwrap();
        conn.execute("INSERT INTO notes(body) VALUES (?)", &[Value::from("kept")])
            .unwrap();
        assert_eq!(conn.last_insert_rowid(), 1);
        assert!(delete_database_files(&path).is_err());
    }
    {
        let conn = Connection::open(&path, None).unwrap();
        assert_eq!(joined(&conn, "SELECT body FROM notes"), ".kept");
        let check = conn.compile_scalar("PRAGMA integrity_check").unwrap();
        assert_eq!(check.evaluate().unwrap().as_deref(), Some("ok"));
    }
    assert!(delete_database_files(&path).unwrap());
    assert!(!path.exists());
    assert!(!delete_database_files(&path).unwrap());
}

#[test]
fn statement_errors_are_classified() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT NOT NULL)", &[])
        .unwrap();
    assert!(matches!(
        conn.execute("SELEC 1", &[]),
        Err(DbError::SqlCompile { .. })
    ));
    assert!(matches!(
        conn.execute("INSERT INTO t(name) VALUES (NULL)", &[]),
        Err(DbError::Constraint { .. })
    ));
    assert!(matches!(
        conn.query("SELECT * FROM missing", &[]),
        Err(DbError::SqlCompile { .. })
    ));
}
