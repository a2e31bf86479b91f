//! Crash images for recovery testing.
//!
//! A crash is simulated at file level: the database file and its WAL are
//! copied while the writing connection still has them open, the copied log
//! is optionally damaged, and the copy is then opened as if the process had
//! died at that instant.
//!
//! ```rust,ignore
//! use cipherlite_testkit::crash::{simulate_crash, CrashScenario};
//!
//! let outcome = simulate_crash(dir.path(), CrashScenario::TornWalTail);
//! assert!(outcome.recovered(), "{outcome:?}");
//! ```

use cipherlite_core::{delete_database_files, wal_path, Config, Connection, DbError, DbResult, Value};
use serde::Serialize;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Rows committed before every simulated crash.
const DURABLE_ROWS: usize = 5;

/// Where the process "dies".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrashScenario {
    /// Rollback-journal mode with a transaction still open.
    OpenTransaction,
    /// Rollback-journal mode right after the last commit.
    AfterCommit,
    /// WAL mode with commits not yet checkpointed.
    UncheckpointedWal,
    /// WAL mode with the last frame cut short.
    TornWalTail,
    /// WAL mode with junk written after the last frame.
    WalTrailingJunk,
}

impl CrashScenario {
    /// Every scenario.
    pub const ALL: [Self; 5] = [
        Self::OpenTransaction,
        Self::AfterCommit,
        Self::UncheckpointedWal,
        Self::TornWalTail,
        Self::WalTrailingJunk,
    ];

    const fn wal(self) -> bool {
        matches!(self, Self::UncheckpointedWal | Self::TornWalTail | Self::WalTrailingJunk)
    }

    /// Rows a correct recovery leaves in the table.
    ///
    /// Each row is its own commit, so a torn tail loses exactly the last one.
    #[must_use]
    pub const fn surviving_rows(self) -> usize {
        match self {
            Self::TornWalTail => DURABLE_ROWS - 1,
            _ => DURABLE_ROWS,
        }
    }
}

/// What reopening a crash image produced.
#[derive(Debug, Clone, Serialize)]
pub struct CrashOutcome {
    /// The simulated crash.
    pub scenario: CrashScenario,
    /// Rows found after reopening, if the image could be read at all.
    pub rows: Option<usize>,
    /// Error raised while building or reopening the image.
    pub error: Option<String>,
}

impl CrashOutcome {
    /// True when the image opened cleanly with the expected rows.
    #[must_use]
    pub fn recovered(&self) -> bool {
        self.error.is_none() && self.rows == Some(self.scenario.surviving_rows())
    }
}

fn text(err: impl Display) -> String {
    err.to_string()
}

/// Copies the database at `source`, and its WAL when present, to `target`.
pub fn capture_crash_image(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(source, target)?;
    let wal = wal_path(source);
    if wal.exists() {
        std::fs::copy(&wal, wal_path(target))?;
    }
    Ok(())
}

fn write_durable_rows(conn: &Connection, wal: bool) -> DbResult<()> {
    if wal && !conn.enable_write_ahead_logging()? {
        return Err(DbError::misuse("WAL refused by this build"));
    }
    conn.execute("CREATE TABLE t(x)", &[])?;
    for i in 0..DURABLE_ROWS {
        conn.execute("INSERT INTO t VALUES (?)", &[Value::Integer(i as i64)])?;
    }
    Ok(())
}

fn damage_wal(image: &Path, scenario: CrashScenario) -> std::io::Result<()> {
    let wal = wal_path(image);
    match scenario {
        CrashScenario::TornWalTail => {
            let file = OpenOptions::new().write(true).open(&wal)?;
            let len = file.metadata()?.len();
            file.set_len(len.saturating_sub(7))
        }
        CrashScenario::WalTrailingJunk => OpenOptions::new()
            .append(true)
            .open(&wal)?
            .write_all(&[0xA5; 100]),
        _ => Ok(()),
    }
}

fn build_and_reopen(live: &Path, image: &Path, scenario: CrashScenario) -> Result<usize, String> {
    let config = Config::default().wal_allowed(true);
    let conn = Connection::open_with_config(live, None, config.clone()).map_err(text)?;
    write_durable_rows(&conn, scenario.wal()).map_err(text)?;
    if scenario == CrashScenario::OpenTransaction {
        conn.begin_transaction(false).map_err(text)?;
        for i in 100..110 {
            conn.execute("INSERT INTO t VALUES (?)", &[Value::Integer(i)])
                .map_err(text)?;
        }
    }
    capture_crash_image(live, image).map_err(text)?;
    conn.close().map_err(text)?;
    damage_wal(image, scenario).map_err(text)?;

    let reopened = Connection::open_with_config(image, None, config).map_err(text)?;
    let rows = reopened.query("SELECT x FROM t", &[]).map_err(text)?.len();
    reopened.close().map_err(text)?;
    Ok(rows)
}

/// Builds the crash image for `scenario` inside `dir`, reopens it, and
/// removes both databases afterwards.
pub fn simulate_crash(dir: &Path, scenario: CrashScenario) -> CrashOutcome {
    let stem = format!("{scenario:?}").to_lowercase();
    let live = dir.join(format!("{stem}.db"));
    let image = dir.join(format!("{stem}-crashed.db"));
    let _ = delete_database_files(&live);
    let _ = delete_database_files(&image);

    let result = build_and_reopen(&live, &image, scenario);
    let _ = delete_database_files(&live);
    let _ = delete_database_files(&image);
    match result {
        Ok(rows) => CrashOutcome {
            scenario,
            rows: Some(rows),
            error: None,
        },
        Err(error) => CrashOutcome {
            scenario,
            rows: None,
            error: Some(error),
        },
    }
}

/// Runs every [`CrashScenario`] in `dir`.
pub fn simulate_all_crashes(dir: &Path) -> Vec<CrashOutcome> {
    CrashScenario::ALL
        .iter()
        .map(|&scenario| simulate_crash(dir, scenario))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn every_crash_image_recovers() {
        let dir = tempdir().unwrap();
        let outcomes = simulate_all_crashes(dir.path());
        assert_eq!(outcomes.len(), CrashScenario::ALL.len());
        for outcome in &outcomes {
            assert!(outcome.recovered(), "{outcome:?}");
        }
    }

    #[test]
    fn torn_tail_loses_only_the_last_commit() {
        let dir = tempdir().unwrap();
        let outcome = simulate_crash(dir.path(), CrashScenario::TornWalTail);
        assert_eq!(outcome.rows, Some(DURABLE_ROWS - 1));
    }

    #[test]
    fn images_are_cleaned_up() {
        let dir = tempdir().unwrap();
        simulate_crash(dir.path(), CrashScenario::AfterCommit);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn capture_without_wal_copies_only_the_database() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("a.db");
        let image = dir.path().join("b.db");
        let conn = Connection::open(&live, None).unwrap();
        conn.execute("CREATE TABLE t(x)", &[]).unwrap();
        capture_crash_image(&live, &image).unwrap();
        assert!(image.exists());
        assert!(!wal_path(&image).exists());
    }
}
