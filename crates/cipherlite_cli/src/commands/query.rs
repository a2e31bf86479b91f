//! Query command implementation.

use super::{display_value, json_value, open_existing, parse_param, CliResult};
use crate::Format;
use cipherlite_core::{Cursor, Value};
use std::path::Path;

/// Runs the query command.
pub fn run(
    path: &Path,
    key: Option<&str>,
    sql: &str,
    params: &[String],
    format: Format,
) -> CliResult<()> {
    let conn = open_existing(path, key)?;
    let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
    let cursor = conn.query(sql, &params)?;
    let output = match format {
        Format::Json => serde_json::to_string_pretty(&rows_as_json(cursor))?,
        Format::Text => rows_as_text(cursor),
    };
    println!("{output}");
    conn.close()?;
    Ok(())
}

/// One JSON object per row, keyed by column name.
pub fn rows_as_json(cursor: Cursor) -> serde_json::Value {
    let columns = cursor.columns().to_vec();
    let rows = cursor
        .map(|row| {
            let object = columns
                .iter()
                .zip(row.values())
                .map(|(name, value)| (name.clone(), json_value(value)))
                .collect::<serde_json::Map<_, _>>();
            serde_json::Value::Object(object)
        })
        .collect();
    serde_json::Value::Array(rows)
}

/// Tab-separated rows under a header line.
pub fn rows_as_text(cursor: Cursor) -> String {
    let mut lines = vec![cursor.columns().join("\t")];
    let count = cursor.len();
    lines.extend(cursor.map(|row| {
        row.values()
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join("\t")
    }));
    lines.push(format!("({count} row{})", if count == 1 { "" } else { "s" }));
    lines.join("\n")
}
