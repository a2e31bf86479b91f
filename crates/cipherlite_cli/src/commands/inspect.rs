//! Inspect command implementation.

use super::{open_existing, CliResult};
use crate::Format;
use cipherlite_core::{journal_path, wal_path, Connection, PAGE_SIZE};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Database file size in bytes.
    pub file_size: u64,
    /// WAL file size in bytes.
    pub wal_size: u64,
    /// Whether a rollback journal is present.
    pub journal_present: bool,
    /// Page size in bytes.
    pub page_size: usize,
    /// Pages in the database, including the header page.
    pub page_count: u32,
    /// Pages on the free list.
    pub freelist_count: u32,
    /// Schema cookie.
    pub schema_version: u32,
    /// Application version number.
    pub user_version: i32,
    /// Whether pages are sealed with the codec.
    pub encrypted: bool,
    /// `delete` or `wal`.
    pub journal_mode: String,
    /// Committed frames waiting for a checkpoint.
    pub wal_frames: u64,
    /// Tables in name order.
    pub tables: Vec<TableStats>,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// `table` or `virtual`.
    pub kind: String,
    /// Row count, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<i64>,
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |m| m.len())
}

/// Gathers the inspection result from an open connection.
pub fn inspect(conn: &Connection, path: &Path, count_rows: bool) -> CliResult<InspectResult> {
    let stats = conn.stats();
    let mut tables = Vec::new();
    for row in conn.query("PRAGMA table_list", &[])? {
        let name = row.text(0).unwrap_or_default();
        let kind = row.text(1).unwrap_or_default();
        let rows = if count_rows {
            conn.query(&format!("SELECT count(*) FROM \"{}\"", name.replace('"', "\"\"")), &[])?
                .next()
                .and_then(|r| r.integer(0))
        } else {
            None
        };
        tables.push(TableStats { name, kind, rows });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: file_size(path),
        wal_size: file_size(&wal_path(path)),
        journal_present: journal_path(path).exists(),
        page_size: PAGE_SIZE,
        page_count: stats.header.page_count,
        freelist_count: stats.header.freelist_count,
        schema_version: stats.header.schema_cookie,
        user_version: stats.header.user_version,
        encrypted: conn.is_encrypted(),
        journal_mode: conn.journal_mode().as_str().to_string(),
        wal_frames: stats.wal_frames,
        tables,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, key: Option<&str>, count_rows: bool, format: Format) -> CliResult<()> {
    let conn = open_existing(path, key)?;
    let result = inspect(&conn, path, count_rows)?;
    conn.close()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!();
    println!("File:");
    println!("  Size:           {} bytes", result.file_size);
    println!("  Page size:      {}", result.page_size);
    println!("  Pages:          {}", result.page_count);
    println!("  Free pages:     {}", result.freelist_count);
    println!("  Encrypted:      {}", result.encrypted);
    println!();
    println!("Journal:");
    println!("  Mode:           {}", result.journal_mode);
    println!("  WAL size:       {} bytes", result.wal_size);
    println!("  WAL frames:     {}", result.wal_frames);
    println!("  Hot journal:    {}", result.journal_present);
    println!();
    println!("Schema:");
    println!("  Schema version: {}", result.schema_version);
    println!("  User version:   {}", result.user_version);
    println!("  Tables:         {}", result.tables.len());
    for table in &result.tables {
        match table.rows {
            Some(rows) => println!("    {} ({}, {} rows)", table.name, table.kind, rows),
            None => println!("    {} ({})", table.name, table.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_reports_tables_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inspect.db");
        let conn = Connection::open(&path, None).unwrap();
        conn.execute(
            "CREATE TABLE notes(body); INSERT INTO notes VALUES ('a'), ('b');
             CREATE VIRTUAL TABLE search USING fts4(body);
             PRAGMA user_version = 3",
            &[],
        )
        .unwrap();

        let result = inspect(&conn, &path, true).unwrap();
        assert_eq!(result.user_version, 3);
        assert_eq!(result.journal_mode, "delete");
        assert!(result.page_count > 1);
        assert_eq!(result.tables.len(), 2);
        assert_eq!(result.tables[0].name, "notes");
        assert_eq!(result.tables[0].rows, Some(2));
        assert_eq!(result.tables[1].kind, "virtual");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["tables"][0]["name"], "notes");
    }
}
