//! Statement compilation and execution.
//!
//! A parsed statement is compiled against the schema visible to the running
//! transaction into a [`Program`]: names become column positions, function
//! names become [`func::Scalar`]/[`func::AggFunc`] values, and `WHERE`
//! clauses are split into an access path plus residual filters. Execution
//! works on an [`Access`] handle and materializes its result.
//!
//! Transaction control (`BEGIN`, `COMMIT`, `ROLLBACK`) and the connection
//! pragmas (`journal_mode`, `wal_checkpoint`) never reach this module.

mod ddl;
mod dml;
mod expr;
mod func;
mod pragma;
mod select;

use crate::error::{DbError, DbResult};
use crate::fts::FtsHit;
use crate::pager::{Header, PageRead, PageRef, ReadView, WriteTxn};
use crate::record::{decode_record, encode_record};
use crate::schema::{FtsDef, Schema, SchemaEntry, TableDef};
use crate::sql::{CreateTable, CreateVirtualTable, Parsed, Pragma, Statement};
use crate::types::RowId;
use crate::value::Value;
use std::sync::Arc;

pub(crate) use func::ENGINE_VERSION;

/// Page access of the running statement.
pub(crate) enum Access<'t> {
    /// Snapshot of a read transaction.
    Read(&'t ReadView),
    /// The connection's write transaction.
    Write(&'t mut WriteTxn),
}

impl Access<'_> {
    /// The write transaction, or a misuse error for read-only access.
    pub fn writer(&mut self) -> DbResult<&mut WriteTxn> {
        match self {
            Self::Write(tx) => Ok(tx),
            Self::Read(_) => Err(DbError::misuse(
                "attempt to write inside a read-only transaction",
            )),
        }
    }
}

impl PageRead for Access<'_> {
    fn page(&self, page: u32) -> DbResult<PageRef> {
        match self {
            Self::Read(view) => view.page(page),
            Self::Write(tx) => tx.page(page),
        }
    }

    fn header(&self) -> &Header {
        match self {
            Self::Read(view) => view.header(),
            Self::Write(tx) => tx.header(),
        }
    }
}

/// Connection state visible to expressions.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Env<'a> {
    pub params: &'a [Value],
    pub last_insert_rowid: RowId,
    pub changes: u64,
}

/// Result of one statement.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a data-modifying statement.
    pub changes: Option<u64>,
    pub last_insert_rowid: Option<RowId>,
}

/// The table a statement reads or writes.
#[derive(Debug, Clone)]
pub(crate) enum Source {
    Table(Arc<TableDef>),
    Fts(Arc<FtsDef>),
}

impl Source {
    pub fn resolve(schema: &Schema, name: &str) -> DbResult<Self> {
        Ok(match schema.require(name)? {
            SchemaEntry::Table(def) => Self::Table(Arc::clone(def)),
            SchemaEntry::Fts(def) => Self::Fts(Arc::clone(def)),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Table(def) => &def.name,
            Self::Fts(def) => &def.name,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        match self {
            Self::Table(def) => def.columns.iter().map(|c| c.name.clone()).collect(),
            Self::Fts(def) => def.columns.clone(),
        }
    }
}

/// One row of the source table.
#[derive(Debug, Clone)]
pub(crate) struct SourceRow {
    pub rowid: RowId,
    pub values: Vec<Value>,
    /// Present when the row came from a full-text query.
    pub hit: Option<FtsHit>,
}

/// Decodes a stored table row. The row id alias column is stored as `NULL`
/// and filled in from the key.
pub(crate) fn decode_table_row(def: &TableDef, rowid: RowId, data: &[u8]) -> DbResult<SourceRow> {
    let mut values = decode_record(data)?;
    values.resize(def.columns.len(), Value::Null);
    if let Some(alias) = def.rowid_alias {
        values[alias] = Value::Integer(rowid);
    }
    Ok(SourceRow {
        rowid,
        values,
        hit: None,
    })
}

/// Encodes a table row for storage.
pub(crate) fn encode_table_row(def: &TableDef, values: &[Value]) -> Vec<u8> {
    match def.rowid_alias {
        Some(alias) => {
            let mut stored = values.to_vec();
            stored[alias] = Value::Null;
            encode_record(&stored)
        }
        None => encode_record(values),
    }
}

enum Plan {
    Select(select::SelectPlan),
    Insert(dml::InsertPlan),
    Update(dml::UpdatePlan),
    Delete(dml::DeletePlan),
    CreateTable(CreateTable),
    CreateVirtualTable(CreateVirtualTable),
    DropTable { name: String, if_exists: bool },
    Pragma(Pragma),
}

/// A compiled statement.
pub(crate) struct Program {
    plan: Plan,
    columns: Vec<String>,
}

impl Program {
    /// Compiles a statement against `schema`.
    pub fn compile(parsed: &Parsed, schema: &Schema) -> DbResult<Self> {
        let plan = match &parsed.statement {
            Statement::Select(select) => Plan::Select(select::SelectPlan::compile(select, schema)?),
            Statement::Insert(insert) => Plan::Insert(dml::InsertPlan::compile(insert, schema)?),
            Statement::Update(update) => Plan::Update(dml::UpdatePlan::compile(update, schema)?),
            Statement::Delete(delete) => Plan::Delete(dml::DeletePlan::compile(delete, schema)?),
            Statement::CreateTable(create) => Plan::CreateTable(create.clone()),
            Statement::CreateVirtualTable(create) => Plan::CreateVirtualTable(create.clone()),
            Statement::DropTable { name, if_exists } => Plan::DropTable {
                name: name.clone(),
                if_exists: *if_exists,
            },
            Statement::Pragma(p) => Plan::Pragma(p.clone()),
            Statement::Begin(_) | Statement::Commit | Statement::Rollback => {
                return Err(DbError::misuse(
                    "transaction control is handled by the connection",
                ))
            }
        };
        let columns = match &plan {
            Plan::Select(select) => select.columns().to_vec(),
            Plan::Pragma(p) => pragma::columns(p),
            _ => Vec::new(),
        };
        Ok(Self { plan, columns })
    }

    /// Runs the statement.
    pub fn execute(&self, access: &mut Access<'_>, schema: &Schema, env: &Env<'_>) -> DbResult<Outcome> {
        let mut outcome = match &self.plan {
            Plan::Select(plan) => Outcome {
                rows: plan.run(&*access, env)?,
                ..Outcome::default()
            },
            Plan::Insert(plan) => plan.run(access.writer()?, env)?,
            Plan::Update(plan) => plan.run(access.writer()?, env)?,
            Plan::Delete(plan) => plan.run(access.writer()?, env)?,
            Plan::CreateTable(create) => ddl::create_table(access.writer()?, schema, create)?,
            Plan::CreateVirtualTable(create) => {
                ddl::create_virtual_table(access.writer()?, schema, create)?
            }
            Plan::DropTable { name, if_exists } => {
                ddl::drop_table(access.writer()?, schema, name, *if_exists)?
            }
            Plan::Pragma(p) => pragma::run(access, schema, p)?,
        };
        outcome.columns = self.columns.clone();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pager::Pager;
    use crate::schema;
    use crate::sql::parse;

    struct Harness {
        tx: WriteTxn,
    }

    impl Harness {
        fn new() -> Self {
            let pager = Arc::new(Pager::open(None, None, &Config::default()).unwrap());
            let mut tx = pager.begin_write();
            schema::init(&mut tx).unwrap();
            Self { tx }
        }

        fn run(&mut self, sql: &str, params: &[Value]) -> DbResult<Outcome> {
            let mut last = Outcome::default();
            for parsed in parse(sql)? {
                let schema = Schema::load(&self.tx)?;
                let program = Program::compile(&parsed, &schema)?;
                let env = Env {
                    params,
                    ..Env::default()
                };
                last = program.execute(&mut Access::Write(&mut self.tx), &schema, &env)?;
            }
            Ok(last)
        }

        fn rows(&mut self, sql: &str) -> Vec<Vec<Value>> {
            self.run(sql, &[]).unwrap().rows
        }
    }

    fn ints(values: &[i64]) -> Vec<Vec<Value>> {
        values.iter().map(|v| vec![Value::Integer(*v)]).collect()
    }

    #[test]
    fn filters_orders_and_limits() {
        let mut h = Harness::new();
        h.run(
            "CREATE TABLE t(k TEXT, v INTEGER);
             INSERT INTO t VALUES ('a', 3), ('b', 1), ('a', 5), ('c', NULL), ('b', 2)",
            &[],
        )
        .unwrap();
        assert_eq!(h.rows("SELECT v FROM t WHERE v > 1 ORDER BY v DESC"), ints(&[5, 3, 2]));
        assert_eq!(h.rows("SELECT v FROM t WHERE v IS NOT NULL ORDER BY 1 LIMIT 2 OFFSET 1"), ints(&[2, 3]));
        assert_eq!(h.rows("SELECT rowid FROM t WHERE rowid = 4"), ints(&[4]));
        assert_eq!(
            h.rows("SELECT DISTINCT k FROM t ORDER BY k"),
            vec![vec![Value::from("a")], vec![Value::from("b")], vec![Value::from("c")]]
        );
        let out = h.run("SELECT v AS value, v * 2 FROM t LIMIT 1", &[]).unwrap();
        assert_eq!(out.columns, vec!["value", "v * 2"]);
    }

    #[test]
    fn column_names_keep_the_source_text() {
        let mut h = Harness::new();
        let out = h
            .run("SELECT -9223372036854775808 - 1, 1+2 ,upper( 'a' ), -9223372036854775808", &[])
            .unwrap();
        assert_eq!(
            out.columns,
            vec!["-9223372036854775808 - 1", "1+2", "upper( 'a' )", "-9223372036854775808"]
        );
        assert_eq!(
            out.rows,
            vec![vec![
                Value::Real(-9_223_372_036_854_775_808.0),
                Value::Integer(3),
                Value::from("A"),
                Value::Integer(i64::MIN),
            ]]
        );
    }

    #[test]
    fn groups_and_aggregates() {
        let mut h = Harness::new();
        h.run(
            "CREATE TABLE t(k TEXT, v INTEGER);
             INSERT INTO t VALUES ('b', 1), ('a', 3), ('a', 5), ('b', 2)",
            &[],
        )
        .unwrap();
        assert_eq!(
            h.rows("SELECT k, sum(v), count(*) FROM t GROUP BY k HAVING sum(v) > 2"),
            vec![
                vec![Value::from("a"), Value::Integer(8), Value::Integer(2)],
                vec![Value::from("b"), Value::Integer(3), Value::Integer(2)],
            ]
        );
        assert_eq!(h.rows("SELECT count(*) FROM t WHERE 0"), ints(&[0]));
        assert_eq!(h.rows("SELECT sum(v) FROM t WHERE 0"), vec![vec![Value::Null]]);
        assert_eq!(h.rows("SELECT max(v) - min(v) FROM t"), ints(&[4]));
        assert_eq!(h.rows("SELECT 1 + 1"), ints(&[2]));
        assert!(h.run("SELECT * WHERE 1", &[]).is_err());
    }

    #[test]
    fn rowid_alias_and_constraints() {
        let mut h = Harness::new();
        h.run(
            "CREATE TABLE p(id INTEGER PRIMARY KEY, name TEXT NOT NULL, tag TEXT UNIQUE)",
            &[],
        )
        .unwrap();
        let out = h.run("INSERT INTO p(name, tag) VALUES ('a', 'x')", &[]).unwrap();
        assert_eq!(out.last_insert_rowid, Some(1));
        h.run("INSERT INTO p VALUES (10, 'b', 'y')", &[]).unwrap();
        assert_eq!(h.rows("SELECT id FROM p ORDER BY id"), ints(&[1, 10]));
        assert_eq!(h.rows("SELECT rowid FROM p WHERE id = 10"), ints(&[10]));

        let err = h.run("INSERT INTO p VALUES (10, 'c', 'z')", &[]).unwrap_err();
        assert!(err.to_string().contains("UNIQUE constraint failed: p.id"), "{err}");
        let err = h.run("INSERT INTO p(name) VALUES (NULL)", &[]).unwrap_err();
        assert!(err.to_string().contains("NOT NULL constraint failed: p.name"), "{err}");
        let err = h.run("INSERT INTO p(name, tag) VALUES ('d', 'x')", &[]).unwrap_err();
        assert!(err.to_string().contains("UNIQUE constraint failed: p.tag"), "{err}");

        let out = h.run("INSERT OR IGNORE INTO p(name, tag) VALUES ('d', 'x')", &[]).unwrap();
        assert_eq!(out.changes, Some(0));
        h.run("INSERT OR REPLACE INTO p(id, name, tag) VALUES (20, 'e', 'x')", &[]).unwrap();
        assert_eq!(h.rows("SELECT id FROM p ORDER BY id"), ints(&[10, 20]));
        assert_eq!(h.rows("SELECT count(*) FROM p"), ints(&[2]));
    }

    #[test]
    fn updates_and_deletes_report_changes() {
        let mut h = Harness::new();
        h.run(
            "CREATE TABLE t(v INTEGER DEFAULT 7, w);
             INSERT INTO t DEFAULT VALUES;
             INSERT INTO t(w) VALUES (1), (2), (3)",
            &[],
        )
        .unwrap();
        assert_eq!(h.rows("SELECT v FROM t WHERE w IS NULL"), ints(&[7]));
        let out = h.run("UPDATE t SET v = v + w WHERE w >= 2", &[]).unwrap();
        assert_eq!(out.changes, Some(2));
        assert_eq!(h.rows("SELECT v FROM t ORDER BY rowid"), ints(&[7, 7, 9, 10]));
        let out = h.run("DELETE FROM t WHERE v = 7", &[]).unwrap();
        assert_eq!(out.changes, Some(2));
        let out = h.run("DELETE FROM t", &[]).unwrap();
        assert_eq!(out.changes, Some(2));
        assert_eq!(h.rows("SELECT count(*) FROM t"), ints(&[0]));
    }

    #[test]
    fn text_parameters_compare_as_numbers_against_numeric_columns() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t(v INTEGER); INSERT INTO t VALUES (3), (30)", &[]).unwrap();
        let out = h.run("SELECT v FROM t WHERE v = ?", &[Value::from("3")]).unwrap();
        assert_eq!(out.rows, ints(&[3]));
        let out = h.run("INSERT INTO t VALUES (?)", &[Value::from("42")]).unwrap();
        assert_eq!(out.changes, Some(1));
        assert_eq!(h.rows("SELECT typeof(v) FROM t WHERE v = 42"), vec![vec![Value::from("integer")]]);
    }

    #[test]
    fn full_text_tables_rank_and_filter() {
        let mut h = Harness::new();
        h.run(
            "CREATE VIRTUAL TABLE docs USING fts4(title, body, tokenize=porter);
             INSERT INTO docs VALUES ('Running', 'runners run daily');
             INSERT INTO docs VALUES ('Walking', 'walks are nice, running too');
             INSERT INTO docs VALUES ('Cooking', 'nothing about it')",
            &[],
        )
        .unwrap();
        assert_eq!(h.rows("SELECT rowid FROM docs WHERE docs MATCH 'run'"), ints(&[1, 2]));
        assert_eq!(h.rows("SELECT docid FROM docs WHERE title MATCH 'run'"), ints(&[1]));
        assert_eq!(
            h.rows(
                "SELECT rowid FROM docs WHERE docs MATCH 'run OR walk'
                 ORDER BY ftsrank(matchinfo(docs), 1.0, 1.0) DESC"
            ),
            ints(&[2, 1])
        );
        assert!(h.run("SELECT matchinfo(docs) FROM docs", &[]).is_err());
        assert!(h.run("SELECT * FROM docs WHERE body MATCH 'x' OR 1", &[]).is_err());

        h.run("UPDATE docs SET body = 'quiet evening' WHERE rowid = 1", &[]).unwrap();
        assert_eq!(h.rows("SELECT rowid FROM docs WHERE body MATCH 'run'"), ints(&[2]));
        h.run("DELETE FROM docs WHERE docs MATCH 'walk'", &[]).unwrap();
        assert_eq!(h.rows("SELECT count(*) FROM docs"), ints(&[2]));
    }

    #[test]
    fn ftsrank_rejects_crafted_matchinfo() {
        let mut h = Harness::new();
        assert!(h.run("SELECT ftsrank(X'FFFFFFFFFFFFFFFF', 1.0)", &[]).is_err());
        assert!(h.run("SELECT ftsrank(X'FFFFFFFFFFFFFFFF00000000', 1.0)", &[]).is_err());
    }

    #[test]
    fn dropped_tables_return_their_pages() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t(x); CREATE VIRTUAL TABLE f USING fts3(c)", &[]).unwrap();
        for i in 0..200 {
            h.run("INSERT INTO t VALUES (?)", &[Value::Text(format!("{i:0>300}"))]).unwrap();
            h.run("INSERT INTO f VALUES (?)", &[Value::Text(format!("word{i} shared"))]).unwrap();
        }
        assert_eq!(h.rows("PRAGMA integrity_check"), vec![vec![Value::from("ok")]]);
        h.run("DROP TABLE t; DROP TABLE f", &[]).unwrap();
        assert!(h.rows("PRAGMA freelist_count")[0][0].as_i64().unwrap() > 0);
        assert_eq!(h.rows("PRAGMA integrity_check"), vec![vec![Value::from("ok")]]);
        assert!(h.run("DROP TABLE t", &[]).is_err());
        h.run("DROP TABLE IF EXISTS t", &[]).unwrap();
    }

    #[test]
    fn table_info_and_user_version() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT 'x')", &[]).unwrap();
        let rows = h.rows("PRAGMA table_info(t)");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], Value::from("name"));
        assert_eq!(rows[1][3], Value::Integer(1));
        assert_eq!(rows[1][4], Value::from("x"));
        h.run("CREATE VIRTUAL TABLE f USING fts4(body)", &[]).unwrap();
        assert_eq!(
            h.rows("PRAGMA table_list"),
            vec![
                vec![Value::from("f"), Value::from("virtual")],
                vec![Value::from("t"), Value::from("table")],
            ]
        );
        h.run("PRAGMA user_version = 7", &[]).unwrap();
        assert_eq!(h.rows("PRAGMA user_version"), ints(&[7]));
    }
}
