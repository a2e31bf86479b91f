//! Proptest strategies for SQL values, identifiers, full-text documents,
//! and table scripts checked against an in-memory model.

use cipherlite_core::Value;
use proptest::prelude::*;

/// Strategy for generating table and column names that never collide with
/// SQL keywords.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_map(|s| format!("t_{s}"))
}

/// Strategy for generating text, including characters outside the
/// Basic Multilingual Plane.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => prop::string::string_regex("\\PC{0,48}").expect("Invalid regex"),
        1 => prop::collection::vec(
            prop_oneof![
                Just('\u{1F601}'),
                Just('\u{1F638}'),
                Just('a'),
                Just('\u{00E9}'),
            ],
            0..8,
        )
        .prop_map(|chars| chars.into_iter().collect()),
    ]
}

/// Strategy for generating any storable value.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        3 => any::<i64>().prop_map(Value::Integer),
        2 => any::<f64>()
            .prop_filter("Reals must be finite", |f| f.is_finite())
            .prop_map(Value::Real),
        3 => text_strategy().prop_map(Value::Text),
        1 => prop::collection::vec(any::<u8>(), 0..2048).prop_map(Value::Blob),
    ]
}

/// Strategy for generating lowercase words suitable for full-text bodies.
pub fn word_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{3,8}").expect("Invalid regex")
}

/// Strategy for generating a document of `1..max_words` words.
pub fn document_strategy(max_words: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(word_strategy(), 1..max_words.max(2))
}

/// An operation against the single-column table `t(v)`.
#[derive(Debug, Clone)]
pub enum TableOperation {
    /// Insert a row.
    Insert {
        /// Stored value.
        value: Value,
    },
    /// Delete the row with the given position among live rows, if any.
    Delete {
        /// Index into the live rows, modulo their count.
        slot: usize,
    },
    /// Replace the value of the row at the given position, if any.
    Update {
        /// Index into the live rows, modulo their count.
        slot: usize,
        /// New value.
        value: Value,
    },
}

/// Strategy for generating table operations.
pub fn table_operation_strategy() -> impl Strategy<Value = TableOperation> {
    prop_oneof![
        4 => value_strategy().prop_map(|value| TableOperation::Insert { value }),
        1 => any::<usize>().prop_map(|slot| TableOperation::Delete { slot }),
        2 => (any::<usize>(), value_strategy())
            .prop_map(|(slot, value)| TableOperation::Update { slot, value }),
    ]
}

/// Strategy for a script of `len` operations against `t(v)`.
pub fn table_script_strategy(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<TableOperation>> {
    prop::collection::vec(table_operation_strategy(), len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::with_memory_db;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn identifiers_name_real_tables(name in identifier_strategy()) {
            with_memory_db(|conn| {
                conn.execute(&format!("CREATE TABLE {name}(x)"), &[]).unwrap();
                conn.execute(&format!("INSERT INTO {name} VALUES (1)"), &[]).unwrap();
                let rows = conn.query(&format!("SELECT x FROM {name}"), &[]).unwrap();
                assert_eq!(rows.len(), 1);
            });
        }

        #[test]
        fn operations_match_a_model(ops in table_script_strategy(1..40)) {
            with_memory_db(|conn| {
                conn.execute("CREATE TABLE t(v)", &[]).unwrap();
                let mut model: Vec<(i64, Value)> = Vec::new();
                for op in &ops {
                    match op {
                        TableOperation::Insert { value } => {
                            conn.execute("INSERT INTO t VALUES (?)", &[value.clone()]).unwrap();
                            model.push((conn.last_insert_rowid(), value.clone()));
                        }
                        TableOperation::Delete { slot } if !model.is_empty() => {
                            let (rowid, _) = model.remove(slot % model.len());
                            conn.execute("DELETE FROM t WHERE rowid = ?", &[Value::Integer(rowid)])
                                .unwrap();
                        }
                        TableOperation::Update { slot, value } if !model.is_empty() => {
                            let index = slot % model.len();
                            let rowid = model[index].0;
                            conn.execute(
                                "UPDATE t SET v = ? WHERE rowid = ?",
                                &[value.clone(), Value::Integer(rowid)],
                            )
                            .unwrap();
                            model[index].1 = value.clone();
                        }
                        _ => {}
                    }
                }
                let stored: Vec<(i64, Value)> = conn
                    .query("SELECT rowid, v FROM t", &[])
                    .unwrap()
                    .map(|row| {
                        let mut values = row.into_values();
                        let value = values.pop().unwrap();
                        let rowid = match values.pop() {
                            Some(Value::Integer(id)) => id,
                            other => panic!("rowid was {other:?}"),
                        };
                        (rowid, value)
                    })
                    .collect();
                assert_eq!(stored, model);
            });
        }

        #[test]
        fn documents_find_their_words(doc in document_strategy(12)) {
            with_memory_db(|conn| {
                conn.execute("CREATE VIRTUAL TABLE d USING fts4(body)", &[]).unwrap();
                conn.execute("INSERT INTO d VALUES (?)", &[Value::from(doc.join(" "))]).unwrap();
                for word in &doc {
                    let hits = conn
                        .query("SELECT docid FROM d WHERE d MATCH ?", &[Value::from(word.as_str())])
                        .unwrap();
                    assert_eq!(hits.len(), 1, "word {word}");
                }
            });
        }
    }
}
