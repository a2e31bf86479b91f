//! Verify command implementation.

use super::{open_existing, CliError, CliResult};
use cipherlite_core::Connection;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Tables scanned end to end.
    pub tables_checked: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks page accounting with `PRAGMA integrity_check`, then reads every
/// row of every table so each page's checksum is verified.
pub fn verify(conn: &Connection) -> VerifyResult {
    let mut result = VerifyResult::default();
    match conn.query("PRAGMA integrity_check", &[]) {
        Ok(rows) => result.errors.extend(
            rows.filter_map(|row| row.text(0))
                .filter(|line| line != "ok"),
        ),
        Err(err) => {
            result.errors.push(err.to_string());
            return result;
        }
    }

    let tables: Vec<String> = match conn.query("PRAGMA table_list", &[]) {
        Ok(rows) => rows.filter_map(|row| row.text(0)).collect(),
        Err(err) => {
            result.errors.push(err.to_string());
            return result;
        }
    };
    for table in tables {
        let sql = format!("SELECT * FROM \"{}\"", table.replace('"', "\"\""));
        match conn.query(&sql, &[]) {
            Ok(_) => result.tables_checked += 1,
            Err(err) => {
                result.errors.push(format!("{table}: {err}"));
                if err.is_corruption() {
                    break;
                }
            }
        }
    }
    result
}

/// Runs the verify command.
pub fn run(path: &Path, key: Option<&str>) -> CliResult<()> {
    println!("Verifying database at {:?}", path);
    println!();

    let conn = open_existing(path, key)?;
    let result = verify(&conn);
    // A poisoned connection still closes; the verdict is already in hand.
    let _ = conn.close();

    println!("Tables checked: {}", result.tables_checked);
    for error in &result.errors {
        println!("  - {error}");
    }
    println!();
    if result.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err(CliError::Failed(format!(
            "verification found {} problem(s)",
            result.errors.len()
        )))
    }
}
