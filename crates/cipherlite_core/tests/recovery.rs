//! Recovery of files left behind by a process that never closed them.

use cipherlite_core::{wal_path, Config, Connection, JournalMode};
use std::path::Path;
use tempfile::tempdir;

fn wal_config() -> Config {
    Config::default().wal_allowed(true)
}

fn count(conn: &Connection) -> i64 {
    conn.query("SELECT count(*) FROM t", &[])
        .unwrap()
        .next()
        .and_then(|row| row.integer(0))
        .unwrap()
}

/// Copies the database and its log while `source` is still open, as if the
/// process had died at this point.
fn snapshot_files(source: &Path, target: &Path) {
    std::fs::copy(source, target).unwrap();
    if wal_path(source).exists() {
        std::fs::copy(wal_path(source), wal_path(target)).unwrap();
    }
}

#[test]
fn committed_wal_frames_are_recovered() {
    let dir = tempdir().unwrap();
    let live = dir.path().join("live.db");
    let crashed = dir.path().join("crashed.db");

    let conn = Connection::open_with_config(&live, None, wal_config()).unwrap();
    assert!(conn.enable_write_ahead_logging().unwrap());
    conn.execute("CREATE TABLE t(x)", &[]).unwrap();
    for i in 0..20 {
        conn.execute(&format!("INSERT INTO t VALUES ({i})"), &[]).unwrap();
    }
    assert!(conn.stats().wal_frames > 0);
    snapshot_files(&live, &crashed);

    let recovered = Connection::open_with_config(&crashed, None, wal_config()).unwrap();
    assert_eq!(recovered.journal_mode(), JournalMode::Wal);
    assert_eq!(count(&recovered), 20);
    let check = recovered.compile_scalar("PRAGMA integrity_check").unwrap();
    assert_eq!(check.evaluate().unwrap().as_deref(), Some("ok"));
}

#[test]
fn uncommitted_work_never_reaches_the_files() {
    let dir = tempdir().unwrap();
    let live = dir.path().join("live.db");
    let crashed = dir.path().join("crashed.db");

    let conn = Connection::open(&live, None).unwrap();
    conn.execute("CREATE TABLE t(x); INSERT INTO t VALUES (1)", &[]).unwrap();
    conn.begin_transaction(false).unwrap();
    for i in 0..100 {
        conn.execute(&format!("INSERT INTO t VALUES ({i})"), &[]).unwrap();
    }
    snapshot_files(&live, &crashed);
    conn.commit().unwrap();

    let recovered = Connection::open(&crashed, None).unwrap();
    assert_eq!(count(&recovered), 1);
    assert_eq!(count(&conn), 101);
}

#[test]
fn last_close_folds_the_log_into_the_database() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fold.db");
    {
        let conn = Connection::open_with_config(&path, None, wal_config()).unwrap();
        assert!(conn.enable_write_ahead_logging().unwrap());
        conn.execute("CREATE TABLE t(x); INSERT INTO t VALUES (1)", &[]).unwrap();
        assert!(wal_path(&path).exists());
    }
    assert!(!wal_path(&path).exists());
    let conn = Connection::open_with_config(&path, None, wal_config()).unwrap();
    assert_eq!(count(&conn), 1);
}

#[test]
fn corruption_poisons_the_connection() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("poison.db");
    {
        let conn = Connection::open(&path, None).unwrap();
        conn.execute("CREATE TABLE t(x)", &[]).unwrap();
        for i in 0..50 {
            conn.execute(&format!("INSERT INTO t VALUES ('{}')", "v".repeat(i * 10)), &[])
                .unwrap();
        }
    }
    // Flip a byte in the last page; every page carries a checksum.
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 100;
    bytes[last] ^= 0x5A;
    std::fs::write(&path, &bytes).unwrap();

    let conn = Connection::open(&path, None).unwrap();
    let err = conn.query("SELECT * FROM t", &[]).unwrap_err();
    assert!(err.is_corruption());
    let again = conn.query("SELECT 1", &[]).unwrap_err();
    assert!(again.is_corruption());
    conn.close().unwrap();
}
