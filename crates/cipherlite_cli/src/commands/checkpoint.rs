//! Checkpoint command implementation.

use super::{open_existing, CliResult};
use cipherlite_core::JournalMode;
use std::path::Path;
use tracing::info;

/// Runs the checkpoint command.
pub fn run(path: &Path, key: Option<&str>) -> CliResult<()> {
    info!("Checkpointing {:?}", path);
    let conn = open_existing(path, key)?;
    if conn.journal_mode() != JournalMode::Wal {
        println!("Database is not in WAL mode; nothing to checkpoint");
        return Ok(conn.close()?);
    }
    let frames = conn.checkpoint()?;
    println!("Checkpointed {frames} frame(s)");
    conn.close()?;
    Ok(())
}
