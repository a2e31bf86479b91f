//! Load generators for CipherLite.
//!
//! Each workload drives one connection, or several threads with their own
//! connections, through many small statements against a `kv` table and
//! reports how many statements completed.

use cipherlite_core::{Config, Connection, DbError, DbResult, Value};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const CREATE: &str = "CREATE TABLE IF NOT EXISTS kv(k INTEGER PRIMARY KEY, v TEXT)";
const UPSERT: &str = "INSERT OR REPLACE INTO kv(k, v) VALUES (?, ?)";
const LOOKUP: &str = "SELECT v FROM kv WHERE k = ?";

/// Shape of a load run.
#[derive(Debug, Clone)]
pub struct LoadProfile {
    /// Statements to issue across all threads.
    pub statements: usize,
    /// Worker threads for the concurrent workloads.
    pub threads: usize,
    /// Length of each stored text value.
    pub payload_len: usize,
    /// Keys cycle through `0..key_space`.
    pub key_space: usize,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            statements: 5_000,
            threads: 4,
            payload_len: 128,
            key_space: 500,
        }
    }
}

impl LoadProfile {
    fn key(&self, i: usize) -> Value {
        Value::Integer((i % self.key_space.max(1)) as i64)
    }

    fn payload(&self) -> Value {
        Value::Text("x".repeat(self.payload_len))
    }
}

/// Outcome of a load run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Statements that succeeded (and, where checked, observed a consistent state).
    pub completed: usize,
    /// Statements that failed or observed an inconsistent state.
    pub errors: usize,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl LoadReport {
    /// Statements per second over the whole run.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.completed + self.errors) as f64 / secs
        } else {
            0.0
        }
    }

    /// True when no statement failed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.errors == 0
    }

    fn aborted(statements: usize) -> Self {
        Self {
            completed: 0,
            errors: statements,
            elapsed: Duration::ZERO,
        }
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} failed in {:?} ({:.0} stmt/s)",
            self.completed,
            self.errors,
            self.elapsed,
            self.rate()
        )
    }
}

#[derive(Default)]
struct Tally {
    completed: AtomicUsize,
    errors: AtomicUsize,
}

impl Tally {
    fn record(&self, ok: bool) {
        let slot = if ok { &self.completed } else { &self.errors };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    fn record_many(&self, ok: bool, n: usize) {
        let slot = if ok { &self.completed } else { &self.errors };
        slot.fetch_add(n, Ordering::Relaxed);
    }

    fn finish(self, started: Instant) -> LoadReport {
        LoadReport {
            completed: self.completed.into_inner(),
            errors: self.errors.into_inner(),
            elapsed: started.elapsed(),
        }
    }
}

/// Single-connection workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// One autocommit upsert per statement.
    Upserts,
    /// Preloads the key space, then one point lookup per statement.
    PointLookups,
    /// Rotates through upsert, lookup, and delete.
    Mixed,
    /// One transaction per statement; every other one fails after writing.
    AbortEveryOther,
    /// Upserts grouped into explicit transactions of `n` rows.
    Batched(usize),
}

/// Runs `workload` on `conn`.
pub fn run_workload(conn: &Connection, workload: Workload, profile: &LoadProfile) -> LoadReport {
    if conn.execute(CREATE, &[]).is_err() {
        return LoadReport::aborted(profile.statements);
    }
    if workload == Workload::PointLookups && preload(conn, profile).is_err() {
        return LoadReport::aborted(profile.statements);
    }

    let payload = profile.payload();
    let tally = Tally::default();
    let started = Instant::now();
    match workload {
        Workload::Upserts => {
            for i in 0..profile.statements {
                tally.record(conn.execute(UPSERT, &[profile.key(i), payload.clone()]).is_ok());
            }
        }
        Workload::PointLookups => {
            for i in 0..profile.statements {
                let found = conn.query(LOOKUP, &[profile.key(i)]).map(|rows| rows.len() == 1);
                tally.record(matches!(found, Ok(true)));
            }
        }
        Workload::Mixed => {
            for i in 0..profile.statements {
                let key = profile.key(i);
                let result = match i % 3 {
                    0 => conn.execute(UPSERT, &[key, payload.clone()]),
                    1 => conn.query(LOOKUP, &[key]).map(|rows| rows.len() as u64),
                    _ => conn.execute("DELETE FROM kv WHERE k = ?", &[key]),
                };
                tally.record(result.is_ok());
            }
        }
        Workload::AbortEveryOther => {
            for i in 0..profile.statements {
                let result = conn.transaction(|tx| {
                    tx.execute(UPSERT, &[Value::Integer(i as i64), payload.clone()])?;
                    if i % 2 == 0 {
                        return Err(DbError::misuse("abandoned by workload"));
                    }
                    Ok(())
                });
                tally.record(result.is_ok());
            }
        }
        Workload::Batched(rows) => {
            let rows = rows.max(1);
            for batch in 0..profile.statements / rows {
                let result = conn.transaction(|tx| {
                    for key in batch * rows..(batch + 1) * rows {
                        tx.execute(UPSERT, &[Value::Integer(key as i64), payload.clone()])?;
                    }
                    Ok(())
                });
                tally.record_many(result.is_ok(), rows);
            }
        }
    }
    tally.finish(started)
}

fn preload(conn: &Connection, profile: &LoadProfile) -> DbResult<()> {
    let payload = profile.payload();
    conn.transaction(|tx| {
        for i in 0..profile.key_space {
            tx.execute(UPSERT, &[profile.key(i), payload.clone()])?;
        }
        Ok(())
    })
}

fn shared_config() -> Config {
    Config::default()
        .wal_allowed(true)
        .busy_timeout(Duration::from_secs(30))
}

/// One writer appends rows while `threads - 1` readers repeatedly count the
/// table, each on its own connection to `path`.
///
/// A reader whose count goes down has seen a commit undone, which is
/// recorded as an error. Half the statements go to the writer.
pub fn readers_beside_writer(path: &Path, profile: &LoadProfile) -> LoadReport {
    let setup = Connection::open_with_config(path, None, shared_config()).and_then(|conn| {
        conn.execute(CREATE, &[])?;
        conn.enable_write_ahead_logging()?;
        Ok(conn)
    });
    let Ok(_owner) = setup else {
        return LoadReport::aborted(profile.statements);
    };

    let writes = profile.statements / 2;
    let readers = profile.threads.saturating_sub(1).max(1);
    let reads_each = (profile.statements - writes) / readers;
    let payload = profile.payload();
    let tally = Tally::default();
    let started = Instant::now();

    thread::scope(|s| {
        let (tally, payload) = (&tally, &payload);
        s.spawn(move || {
            let Ok(conn) = Connection::open(path, None) else {
                tally.record_many(false, writes);
                return;
            };
            for i in 0..writes {
                let row = [Value::Integer(i as i64), payload.clone()];
                tally.record(conn.execute(UPSERT, &row).is_ok());
            }
        });
        for _ in 0..readers {
            s.spawn(move || {
                let Ok(conn) = Connection::open(path, None) else {
                    tally.record_many(false, reads_each);
                    return;
                };
                let mut seen = 0i64;
                for _ in 0..reads_each {
                    let count = conn
                        .compile_scalar("SELECT count(*) FROM kv")
                        .and_then(|stmt| stmt.evaluate())
                        .ok()
                        .flatten()
                        .and_then(|text| text.parse::<i64>().ok());
                    match count {
                        Some(n) if n >= seen => {
                            seen = n;
                            tally.record(true);
                        }
                        _ => tally.record(false),
                    }
                }
            });
        }
    });
    tally.finish(started)
}

/// `threads` writers insert disjoint key ranges, each on its own
/// connection, all contending for the single write lock.
pub fn contending_writers(path: &Path, profile: &LoadProfile) -> LoadReport {
    let setup = Connection::open_with_config(path, None, shared_config()).and_then(|conn| {
        conn.execute(CREATE, &[])?;
        Ok(conn)
    });
    let Ok(_owner) = setup else {
        return LoadReport::aborted(profile.statements);
    };

    let threads = profile.threads.max(1);
    let per_thread = profile.statements / threads;
    let payload = profile.payload();
    let tally = Tally::default();
    let started = Instant::now();

    thread::scope(|s| {
        for t in 0..threads {
            let (tally, payload) = (&tally, &payload);
            s.spawn(move || {
                let Ok(conn) = Connection::open(path, None) else {
                    tally.record_many(false, per_thread);
                    return;
                };
                for key in t * per_thread..(t + 1) * per_thread {
                    let row = [Value::Integer(key as i64), payload.clone()];
                    tally.record(conn.execute(UPSERT, &row).is_ok());
                }
            });
        }
    });
    tally.finish(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rows(conn: &Connection) -> String {
        conn.compile_scalar("SELECT count(*) FROM kv")
            .unwrap()
            .evaluate()
            .unwrap()
            .unwrap()
    }

    fn small(statements: usize, key_space: usize) -> LoadProfile {
        LoadProfile {
            statements,
            key_space,
            payload_len: 48,
            ..LoadProfile::default()
        }
    }

    #[test]
    fn upserts_fill_the_key_space() {
        let conn = Connection::open_in_memory().unwrap();
        let report = run_workload(&conn, Workload::Upserts, &small(1_000, 250));
        assert!(report.is_clean());
        assert_eq!(report.completed, 1_000);
        assert_eq!(rows(&conn), "250");
    }

    #[test]
    fn point_lookups_find_every_preloaded_row() {
        let conn = Connection::open_in_memory().unwrap();
        let report = run_workload(&conn, Workload::PointLookups, &small(600, 100));
        assert_eq!(report.completed, 600);
        assert!(report.is_clean());
    }

    #[test]
    fn mixed_statements_all_succeed() {
        let conn = Connection::open_in_memory().unwrap();
        let report = run_workload(&conn, Workload::Mixed, &small(900, 50));
        assert!(report.is_clean(), "{report}");
    }

    #[test]
    fn abandoned_transactions_leave_no_rows() {
        let conn = Connection::open_in_memory().unwrap();
        let report = run_workload(&conn, Workload::AbortEveryOther, &small(100, 100));
        assert_eq!((report.completed, report.errors), (50, 50));
        assert_eq!(rows(&conn), "50");
        assert!(!conn.in_transaction());
    }

    #[test]
    fn batches_commit_whole() {
        let conn = Connection::open_in_memory().unwrap();
        let report = run_workload(&conn, Workload::Batched(100), &small(1_000, 1_000));
        assert_eq!(report.completed, 1_000);
        assert_eq!(rows(&conn), "1000");
    }

    #[test]
    fn readers_never_see_the_table_shrink() {
        let dir = tempdir().unwrap();
        let profile = LoadProfile {
            statements: 400,
            threads: 3,
            payload_len: 32,
            key_space: 400,
        };
        let report = readers_beside_writer(&dir.path().join("rw.db"), &profile);
        assert!(report.is_clean(), "{report}");
        assert_eq!(report.completed, 400);
    }

    #[test]
    fn contending_writers_all_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("writers.db");
        let profile = LoadProfile {
            statements: 200,
            threads: 4,
            payload_len: 32,
            key_space: 200,
        };

        let report = contending_writers(&path, &profile);
        assert!(report.is_clean(), "{report}");
        let conn = Connection::open(&path, None).unwrap();
        assert_eq!(rows(&conn), "200");
    }

    #[test]
    fn report_serializes_for_the_cli() {
        let report = LoadReport {
            completed: 3,
            errors: 1,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(report.rate(), 2.0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["completed"], 3);
        assert!(report.to_string().starts_with("3 ok, 1 failed"));
    }
}
