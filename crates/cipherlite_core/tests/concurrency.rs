//! Readers and writers on separate connections to one file.

use cipherlite_core::{Config, Connection, JournalMode, Value};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn open(path: &Path) -> Connection {
    let config = Config::default()
        .wal_allowed(true)
        .busy_timeout(Duration::from_secs(10));
    Connection::open_with_config(path, None, config).unwrap()
}

fn seed(conn: &Connection) {
    conn.execute("CREATE TABLE t1(x, y)", &[]).unwrap();
    conn.execute("INSERT INTO t1 VALUES (1, 2), (3, 4)", &[]).unwrap();
}

/// Runs `SELECT sum(x+y)` on `reader` in another thread while `writer` holds
/// an uncommitted insert, and reports whether the reader finished before the
/// writer rolled back.
fn reader_finishes_during_write(writer: &Connection, reader: &Connection) -> (bool, String) {
    writer.begin_transaction(false).unwrap();
    writer.execute("INSERT INTO t1 VALUES (5, 6)", &[]).unwrap();
    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|s| {
        let handle = s.spawn(move || {
            let sum = reader
                .compile_scalar("SELECT sum(x+y) FROM t1")
                .unwrap()
                .evaluate()
                .unwrap()
                .unwrap_or_default();
            let _ = done_tx.send(());
            sum
        });
        let concurrent = done_rx.recv_timeout(Duration::from_secs(2)).is_ok();
        writer.rollback().unwrap();
        (concurrent, handle.join().unwrap())
    })
}

#[test]
fn wal_reader_does_not_wait_for_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.db");
    let writer = open(&path);
    seed(&writer);
    assert!(writer.enable_write_ahead_logging().unwrap());
    assert_eq!(writer.journal_mode(), JournalMode::Wal);
    let reader = open(&path);

    let (concurrent, sum) = reader_finishes_during_write(&writer, &reader);
    assert!(concurrent);
    assert_eq!(sum, "10");
}

#[test]
fn rollback_journal_reader_waits_for_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let writer = open(&path);
    seed(&writer);
    let reader = open(&path);

    let (concurrent, sum) = reader_finishes_during_write(&writer, &reader);
    assert!(!concurrent);
    assert_eq!(sum, "10");
}

#[test]
fn reader_times_out_behind_a_long_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("timeout.db");
    // The first connection's configuration governs the shared lock manager.
    let config = Config::default().busy_timeout(Duration::from_millis(50));
    let writer = Connection::open_with_config(&path, None, config.clone()).unwrap();
    seed(&writer);
    let impatient = Connection::open_with_config(&path, None, config).unwrap();

    writer.begin_transaction(true).unwrap();
    let err = impatient.query("SELECT * FROM t1", &[]).unwrap_err();
    assert!(err.is_busy());
    assert!(writer.lock_state().writer);
    writer.commit().unwrap();
    assert_eq!(impatient.query("SELECT * FROM t1", &[]).unwrap().len(), 2);
}

#[test]
fn wal_snapshot_is_stable_inside_a_read_transaction() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.db");
    let writer = open(&path);
    seed(&writer);
    assert!(writer.enable_write_ahead_logging().unwrap());
    let reader = open(&path);

    reader.execute("BEGIN", &[]).unwrap();
    assert_eq!(reader.query("SELECT * FROM t1", &[]).unwrap().len(), 2);
    writer
        .execute("INSERT INTO t1 VALUES (?, ?)", &[Value::Integer(5), Value::Integer(6)])
        .unwrap();
    assert_eq!(reader.query("SELECT * FROM t1", &[]).unwrap().len(), 2);
    reader.execute("COMMIT", &[]).unwrap();
    assert_eq!(reader.query("SELECT * FROM t1", &[]).unwrap().len(), 3);

    // Readers hold checkpoints off; once idle the log can be folded in.
    assert!(writer.checkpoint().unwrap() > 0);
    assert_eq!(writer.stats().wal_frames, 0);
}

#[test]
fn many_threads_insert_through_their_own_connections() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("many.db");
    let setup = open(&path);
    setup.execute("CREATE TABLE log(thread INTEGER, n INTEGER)", &[]).unwrap();
    assert!(setup.enable_write_ahead_logging().unwrap());

    thread::scope(|s| {
        for thread_no in 0..4i64 {
            let path = &path;
            s.spawn(move || {
                let conn = open(path);
                for n in 0..50i64 {
                    conn.execute(
                        "INSERT INTO log VALUES (?, ?)",
                        &[Value::Integer(thread_no), Value::Integer(n)],
                    )
                    .unwrap();
                }
            });
        }
    });
    let total = setup.compile_scalar("SELECT count(*) FROM log").unwrap();
    assert_eq!(total.evaluate().unwrap().as_deref(), Some("200"));
    let lock = setup.lock_state();
    assert_eq!((lock.readers, lock.writer), (0, false));
}
