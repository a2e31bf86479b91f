//! Exec command implementation.

use super::{parse_param, CliResult};
use cipherlite_core::{Connection, Value};
use std::path::Path;
use tracing::info;

/// Runs the exec command.
pub fn run(path: &Path, key: Option<&str>, sql: &str, params: &[String]) -> CliResult<()> {
    info!("Executing against {:?}", path);
    let conn = Connection::open(path, key)?;
    let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
    let changes = conn.execute(sql, &params)?;
    println!("{changes} row(s) changed");
    if changes > 0 && conn.last_insert_rowid() != 0 {
        println!("last insert rowid: {}", conn.last_insert_rowid());
    }
    conn.close()?;
    Ok(())
}
