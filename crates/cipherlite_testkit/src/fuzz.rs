//! Fuzz testing harnesses for CipherLite.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks. Every target must return normally for any
//! input; errors are fine, panics are bugs.

use cipherlite_core::{Connection, Value};

fn seeded_connection() -> Option<Connection> {
    let conn = Connection::open_in_memory().ok()?;
    conn.execute(
        "CREATE TABLE t(id INTEGER PRIMARY KEY, a, b TEXT);
         INSERT INTO t(a, b) VALUES (1, 'one'), (2.5, 'two'), (NULL, 'three');
         CREATE VIRTUAL TABLE d USING fts4(body);
         INSERT INTO d VALUES ('quick brown fox'), ('lazy dog')",
        &[],
    )
    .ok()?;
    Some(conn)
}

/// Fuzz target for the SQL front end.
///
/// Arbitrary text is compiled and executed against a small seeded database.
pub fn fuzz_sql(data: &[u8]) {
    let Some(conn) = seeded_connection() else {
        return;
    };
    let sql = String::from_utf8_lossy(data);
    let _ = conn.execute(&sql, &[]);
    let _ = conn.query(&sql, &[]);
    // Whatever happened, the connection must still answer.
    assert!(conn.query("SELECT 1", &[]).is_ok());
}

/// Fuzz target for the full-text query grammar.
pub fn fuzz_fts_query(data: &[u8]) {
    let Some(conn) = seeded_connection() else {
        return;
    };
    let query = String::from_utf8_lossy(data).into_owned();
    let _ = conn.query("SELECT docid FROM d WHERE d MATCH ?", &[Value::Text(query)]);
}

/// Fuzz target for opening damaged database files.
///
/// The bytes become the database file; opening and scanning it must fail
/// cleanly or succeed.
pub fn fuzz_database_file(data: &[u8]) {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let path = dir.path().join("fuzz.db");
    if std::fs::write(&path, data).is_err() {
        return;
    }
    if let Ok(conn) = Connection::open(&path, None) {
        let _ = conn.query("PRAGMA integrity_check", &[]);
        let _ = conn.query("PRAGMA table_list", &[]);
        let _ = conn.close();
    }
}

/// Fuzz target for damage inside a valid file.
///
/// A small database is written, then `data` is interpreted as
/// (offset, byte) pairs that are XORed into the file before reopening.
pub fn fuzz_page_damage(data: &[u8]) {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let path = dir.path().join("damage.db");
    {
        let Ok(conn) = Connection::open(&path, None) else {
            return;
        };
        let setup = conn.execute("CREATE TABLE t(x)", &[]).and_then(|_| {
            conn.transaction(|tx| {
                for i in 0..64i64 {
                    tx.execute("INSERT INTO t VALUES (?)", &[Value::Text(format!("{i:0>200}"))])?;
                }
                Ok(())
            })
        });
        if setup.is_err() || conn.close().is_err() {
            return;
        }
    }
    let Ok(mut bytes) = std::fs::read(&path) else {
        return;
    };
    for pair in data.chunks_exact(3) {
        let offset = usize::from(u16::from_be_bytes([pair[0], pair[1]])) * 7 % bytes.len();
        bytes[offset] ^= pair[2] | 1;
    }
    if std::fs::write(&path, &bytes).is_err() {
        return;
    }
    if let Ok(conn) = Connection::open(&path, None) {
        // Damage the checksums cannot see lands in unused trailer bytes.
        if let Ok(rows) = conn.query("SELECT x FROM t", &[]) {
            assert_eq!(rows.len(), 64);
        }
        let _ = conn.close();
    }
}

/// Fuzz target for byte-driven operation sequences.
pub fn fuzz_operations(data: &[u8]) {
    let Some(conn) = seeded_connection() else {
        return;
    };
    for chunk in data.chunks(4) {
        let op = chunk[0];
        let key = Value::Integer(i64::from(chunk.get(1).copied().unwrap_or(0)));
        let payload = Value::Blob(chunk.iter().skip(2).copied().collect());
        let _ = match op % 6 {
            0 => conn.execute("INSERT INTO t(a, b) VALUES (?, ?)", &[payload, key]),
            1 => conn.execute("DELETE FROM t WHERE id = ?", &[key]),
            2 => conn.execute("UPDATE t SET a = ? WHERE id = ?", &[payload, key]),
            3 => conn.query("SELECT * FROM t WHERE a = ?", &[payload]).map(|rows| rows.len() as u64),
            4 => conn.begin_transaction(false).map(|_| 0),
            _ => {
                if conn.in_transaction() {
                    conn.rollback().map(|_| 0)
                } else {
                    Ok(0)
                }
            }
        };
    }
    if conn.in_transaction() {
        let _ = conn.commit();
    }
    let check = conn.query("PRAGMA integrity_check", &[]).ok().and_then(|mut rows| rows.next());
    assert_eq!(
        check.and_then(|row| row.text(0)).as_deref(),
        Some("ok"),
        "integrity check failed after operations"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherlite_core::PAGE_SIZE;
    use proptest::prelude::*;

    #[test]
    fn fuzz_sql_samples() {
        for sql in [
            "",
            "SELECT",
            "SELECT * FROM t WHERE",
            "BEGIN; BEGIN",
            "COMMIT",
            "INSERT INTO t VALUES (1, 2, 3, 4)",
            "SELECT 1 + + + 2",
            "CREATE TABLE",
            "DROP TABLE t; SELECT * FROM t",
            "SELECT 'unterminated",
            "PRAGMA journal_mode = bogus",
            "\u{0}\u{1F601}",
        ] {
            fuzz_sql(sql.as_bytes());
        }
    }

    #[test]
    fn fuzz_fts_query_samples() {
        for q in ["", "\"", "*", "OR", "NOT NOT", "body:", "a OR", "\"unclosed phrase", "x:y:z"] {
            fuzz_fts_query(q.as_bytes());
        }
    }

    #[test]
    fn fuzz_database_file_samples() {
        fuzz_database_file(b"");
        fuzz_database_file(b"SQLite format 3\0");
        fuzz_database_file(&vec![0u8; PAGE_SIZE]);
        fuzz_database_file(&vec![0xFFu8; PAGE_SIZE * 2]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn fuzz_sql_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
            fuzz_sql(&data);
        }

        #[test]
        fn fuzz_operations_keep_integrity(data in prop::collection::vec(any::<u8>(), 0..256)) {
            fuzz_operations(&data);
        }

        #[test]
        fn fuzz_page_damage_never_panics(data in prop::collection::vec(any::<u8>(), 0..12)) {
            fuzz_page_damage(&data);
        }
    }
}
