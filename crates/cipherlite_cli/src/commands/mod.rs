//! CLI command implementations.

pub mod checkpoint;
pub mod exec;
pub mod inspect;
pub mod query;
pub mod selftest;
pub mod verify;

use cipherlite_core::{Config, Connection, DbError, Value};
use std::path::Path;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The engine refused the operation.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Reading or writing a file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Rendering JSON failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The database file does not exist.
    #[error("no database found at {0}")]
    NotFound(String),

    /// A check ran and did not pass.
    #[error("{0}")]
    Failed(String),
}

/// Result type of CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Opens an existing database; commands other than `exec` never create one.
pub fn open_existing(path: &Path, key: Option<&str>) -> CliResult<Connection> {
    if !path.exists() {
        return Err(CliError::NotFound(path.display().to_string()));
    }
    Ok(Connection::open_with_config(
        path,
        key,
        Config::default().create_if_missing(false),
    )?)
}

/// Parses a command-line parameter: `NULL`, an integer, a real, or text.
/// A leading `=` forces text, so `=42` binds the string `"42"`.
pub fn parse_param(raw: &str) -> Value {
    if let Some(text) = raw.strip_prefix('=') {
        return Value::from(text);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::Real(f),
        _ => Value::from(raw),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Renders a value for text output; blobs print as `X'..'` literals.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("X'{}'", hex(b)),
    }
}

/// Converts a value to JSON; blobs become hex strings.
pub fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(hex(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_pick_the_narrowest_type() {
        assert_eq!(parse_param("42"), Value::Integer(42));
        assert_eq!(parse_param("-1.5"), Value::Real(-1.5));
        assert_eq!(parse_param("NULL"), Value::Null);
        assert_eq!(parse_param("hello"), Value::from("hello"));
        assert_eq!(parse_param("=42"), Value::from("42"));
        assert_eq!(parse_param("inf"), Value::from("inf"));
    }

    #[test]
    fn values_render_for_text_and_json() {
        assert_eq!(display_value(&Value::Blob(vec![0x12, 0xAB])), "X'12AB'");
        assert_eq!(display_value(&Value::Null), "NULL");
        assert_eq!(json_value(&Value::Integer(7)), serde_json::json!(7));
        assert_eq!(json_value(&Value::Blob(vec![1])), serde_json::json!("01"));
    }

    #[test]
    fn missing_database_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_existing(&dir.path().join("absent.db"), None).unwrap_err();
        assert!(matches!(err, CliError::NotFound(_)));
    }
}
