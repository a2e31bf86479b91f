//! Functional self-test suite.
//!
//! Runs the end-to-end checks an application embedding the engine relies on:
//! cursors, cross-thread access, encryption, the open helper, full-text
//! search, supplementary characters, and stemming. Each check compares a
//! result string against an expected string and lands in a [`SuiteReport`]
//! that renders as `name... ok` or `name... FAILED` lines followed by
//! `N errors from M tests`.

use crate::fixtures::{file_is_encrypted, joined_column, scenarios};
use cipherlite_core::{
    delete_database_files, has_codec, register_tokenizer, Connection, DbResult, OpenCallbacks,
    OpenHelper, Value,
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long a reader may take before the writer's transaction counts as
/// blocking it.
const BLOCK_WINDOW: Duration = Duration::from_secs(2);

/// One comparison of a result against its expectation.
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    /// Check name, e.g. `csr_test_1.1`.
    pub name: String,
    /// Observed result.
    pub result: String,
    /// Expected result.
    pub expected: String,
    /// Whether the two matched.
    pub passed: bool,
}

/// Accumulated results of a suite run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    /// Engine version reported by `sqlite_version()`.
    pub version: String,
    /// Whether the build includes the page codec.
    pub has_codec: bool,
    /// Every comparison in execution order.
    pub outcomes: Vec<TestOutcome>,
    /// Warnings that did not count as results.
    pub warnings: Vec<String>,
}

impl SuiteReport {
    /// Records a comparison.
    pub fn record(&mut self, name: impl Into<String>, result: impl Into<String>, expected: impl Into<String>) {
        let result = result.into();
        let expected = expected.into();
        self.outcomes.push(TestOutcome {
            name: name.into(),
            passed: result == expected,
            result,
            expected,
        });
    }

    /// Records a warning.
    pub fn warn(&mut self, name: &str, warning: &str) {
        self.warnings.push(format!("{name}: {warning}"));
    }

    /// Number of comparisons run.
    #[must_use]
    pub fn tests(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of failed comparisons.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed).count()
    }

    /// True when every comparison passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.errors() == 0
    }

    /// Returns the outcome recorded under `name`, if any.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CipherLite version {}\n", self.version)?;
        for warning in &self.warnings {
            writeln!(f, "WARNING:{warning}")?;
        }
        for outcome in &self.outcomes {
            if outcome.passed {
                writeln!(f, "{}... ok", outcome.name)?;
            } else {
                writeln!(f, "{}... FAILED", outcome.name)?;
                writeln!(f, "   res=     \"{}\"", outcome.result)?;
                writeln!(f, "   expected=\"{}\"", outcome.expected)?;
            }
        }
        write!(f, "\n{} errors from {} tests", self.errors(), self.tests())
    }
}

type Check = fn(&FunctionalSuite, &mut SuiteReport) -> DbResult<()>;

/// The functional suite, run against files in one scratch directory.
#[derive(Debug, Clone)]
pub struct FunctionalSuite {
    db_path: PathBuf,
}

impl FunctionalSuite {
    /// Creates a suite that keeps its database at `dir/test.db`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            db_path: dir.as_ref().join(crate::fixtures::DB_FILE),
        }
    }

    /// Path of the scratch database.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Runs every check. A check that fails with an error is recorded as a
    /// failed result carrying the error text; later checks still run.
    pub fn run(&self) -> SuiteReport {
        let mut report = SuiteReport {
            has_codec: has_codec(),
            ..SuiteReport::default()
        };
        report.version = match report_version() {
            Ok(version) => version,
            Err(err) => {
                report.warn("version", &err.to_string());
                String::from("unknown")
            }
        };

        let checks: [(&str, Check); 14] = [
            ("csr_test_1", Self::csr_test_1),
            ("csr_test_2", Self::csr_test_2),
            ("thread_test_1", Self::thread_test_1),
            ("thread_test_2", Self::thread_test_2),
            ("see_test_1", Self::see_test_1),
            ("see_test_2", Self::see_test_2),
            ("fts_test_1", Self::fts_test_1),
            ("fts_test_2", Self::fts_test_2),
            ("fts_test_3", Self::fts_test_3),
            ("supp_char_test1", |s, r| s.supp_char_test(r, "supp_char_test1", '\u{1F601}')),
            ("supp_char_test2", |s, r| s.supp_char_test(r, "supp_char_test2", '\u{1F638}')),
            ("stemmer_test_1", Self::stemmer_test_1),
            ("stemmer_test_2", Self::stemmer_test_2),
            ("file_cleanup", Self::file_cleanup),
        ];
        for (name, check) in checks {
            if let Err(err) = check(self, &mut report) {
                report.record(name, format!("error: {err}"), "no error");
            }
        }
        // Leave the process-wide tokenizer default as it was found.
        if let Err(err) = register_tokenizer("HTMLTokenizer", None) {
            report.warn("tokenizer", &err.to_string());
        }
        report
    }

    fn fresh(&self) -> DbResult<Connection> {
        delete_database_files(&self.db_path)?;
        Connection::open(&self.db_path, None)
    }

    fn encryption_state(&self) -> String {
        match file_is_encrypted(&self.db_path) {
            Ok(true) => "encrypted".into(),
            Ok(false) => "unencrypted".into(),
            Err(err) => format!("error: {err}"),
        }
    }

    fn csr_test_1(&self, report: &mut SuiteReport) -> DbResult<()> {
        let db = self.fresh()?;
        db.execute("CREATE TABLE t1(x)", &[])?;
        db.execute("INSERT INTO t1 VALUES ('one'), ('two'), ('three')", &[])?;
        report.record("csr_test_1.1", joined_column(&db, "SELECT x FROM t1"), ".one.two.three");
        db.close()?;
        report.record("csr_test_1.2", self.encryption_state(), "unencrypted");
        Ok(())
    }

    fn csr_test_2(&self, report: &mut SuiteReport) -> DbResult<()> {
        let db = self.fresh()?;
        db.execute("CREATE TABLE t1(x)", &[])?;
        let mut expected = String::new();
        db.execute("BEGIN", &[])?;
        for _ in 0..1000 {
            db.execute("INSERT INTO t1 VALUES ('one'), ('two'), ('three')", &[])?;
            expected.push_str(".one.two.three");
        }
        db.execute("COMMIT", &[])?;
        report.record("csr_test_2.1", joined_column(&db, "SELECT x FROM t1"), expected);

        db.execute("BEGIN", &[])?;
        for _ in 0..1000 {
            db.execute("INSERT INTO t1 VALUES (X'123456'), (X'789ABC'), (X'DEF012')", &[])?;
            db.execute("INSERT INTO t1 VALUES (45), (46), (47)", &[])?;
            db.execute("INSERT INTO t1 VALUES (8.1), (8.2), (8.3)", &[])?;
            db.execute("INSERT INTO t1 VALUES (NULL), (NULL), (NULL)", &[])?;
        }
        db.execute("COMMIT", &[])?;
        let rows = db.query("SELECT x FROM t1", &[])?.count();
        report.record("csr_test_2.2", rows.to_string(), "15000");
        db.close()
    }

    fn thread_test_1(&self, report: &mut SuiteReport) -> DbResult<()> {
        let db = self.fresh()?;
        db.execute("CREATE TABLE t1(x, y)", &[])?;
        db.execute("INSERT INTO t1 VALUES (1, 2), (3, 4)", &[])?;
        let sum = thread::scope(|s| {
            s.spawn(|| db.compile_scalar("SELECT sum(x+y) FROM t1")?.evaluate())
                .join()
                .unwrap_or_else(|_| Ok(Some("panicked".into())))
        })?;
        report.record("thread_test_1", sum.unwrap_or_default(), "10");
        db.close()
    }

    /// A reader on a second connection while the first holds an open write
    /// transaction: WAL lets it through, the rollback journal blocks it.
    /// Keyed builds refuse WAL, so the expectation follows `has_codec()`.
    fn thread_test_2(&self, report: &mut SuiteReport) -> DbResult<()> {
        let db = self.fresh()?;
        db.execute("CREATE TABLE t1(x, y)", &[])?;
        db.execute("INSERT INTO t1 VALUES (1, 2), (3, 4)", &[])?;
        db.enable_write_ahead_logging()?;
        db.begin_transaction(false)?;
        db.execute("INSERT INTO t1 VALUES (5, 6)", &[])?;

        let reader = Connection::open(&self.db_path, None)?;
        let (done_tx, done_rx) = mpsc::channel();
        let (res, sum) = thread::scope(|s| {
            let reader = &reader;
            let handle = s.spawn(move || {
                let sum = reader
                    .compile_scalar("SELECT sum(x+y) FROM t1")
                    .and_then(|st| st.evaluate());
                let _ = done_tx.send(());
                sum
            });
            let res = match done_rx.recv_timeout(BLOCK_WINDOW) {
                Ok(()) => "concurrent",
                Err(_) => "blocked",
            };
            let ended = db.rollback();
            let sum = handle
                .join()
                .unwrap_or_else(|_| Ok(Some("panicked".into())));
            (res, ended.and(sum))
        });
        let sum = sum?;
        if has_codec() {
            report.record("thread_test_2", res, "blocked");
        } else {
            report.record("thread_test_2", res, "concurrent");
        }
        if sum.as_deref() != Some("10") {
            report.warn("thread_test_2", &format!("reader saw sum {sum:?}"));
        }
        reader.close()?;
        db.close()
    }

    fn see_test_1(&self, report: &mut SuiteReport) -> DbResult<()> {
        if !has_codec() {
            return Ok(());
        }
        delete_database_files(&self.db_path)?;
        let password = "secretkey";
        {
            let db = Connection::open(&self.db_path, Some(password))?;
            db.execute("CREATE TABLE t1(x)", &[])?;
            db.execute("INSERT INTO t1 VALUES ('one'), ('two'), ('three')", &[])?;
            report.record("see_test_1.1", joined_column(&db, "SELECT x FROM t1"), ".one.two.three");
            db.close()?;
        }
        report.record("see_test_1.2", self.encryption_state(), "encrypted");
        {
            let db = Connection::open(&self.db_path, Some(password))?;
            report.record("see_test_1.3", joined_column(&db, "SELECT x FROM t1"), ".one.two.three");
            db.close()?;
        }
        report.record("see_test_1.4", self.open_verdict(None), "encrypted");
        report.record("see_test_1.5", self.open_verdict(Some("otherkey")), "encrypted");
        Ok(())
    }

    /// Reads `t1` with `key`; a corruption error means the file is sealed
    /// against that key.
    fn open_verdict(&self, key: Option<&str>) -> String {
        let attempt = Connection::open(&self.db_path, key).and_then(|db| {
            let rows = db.query("SELECT x FROM t1", &[]).map(|_| ());
            db.close()?;
            rows
        });
        match attempt {
            Ok(()) => "unencrypted".into(),
            Err(err) if err.is_corruption() => "encrypted".into(),
            Err(err) => format!("error: {err}"),
        }
    }

    fn see_test_2(&self, report: &mut SuiteReport) -> DbResult<()> {
        if !has_codec() {
            return Ok(());
        }
        delete_database_files(&self.db_path)?;

        let helper = OpenHelper::new(Some(self.db_path.as_path()), 1, SecretHelper)?;
        let db = helper.database()?;
        db.execute("INSERT INTO t1 VALUES ('x'), ('y'), ('z')", &[])?;
        report.record("see_test_2.1", joined_column(&db, "SELECT x FROM t1"), ".x.y.z");
        report.record("see_test_2.2", self.encryption_state(), "encrypted");
        helper.close()?;

        let helper = OpenHelper::new(Some(self.db_path.as_path()), 1, SecretHelper)?;
        let db = helper.database()?;
        report.record("see_test_2.3", joined_column(&db, "SELECT x FROM t1"), ".x.y.z");
        helper.close()?;
        let db = helper.database()?;
        report.record("see_test_2.4", joined_column(&db, "SELECT x FROM t1"), ".x.y.z");
        helper.close()?;
        report.record("see_test_2.5", self.encryption_state(), "encrypted");
        Ok(())
    }

    fn fts_test_1(&self, report: &mut SuiteReport) -> DbResult<()> {
        let db = self.fresh()?;
        register_tokenizer("HTMLTokenizer", None)?;
        db.execute("CREATE VIRTUAL TABLE v1 USING fts4(name, tokenize=HTMLTokenizer)", &[])?;
        for name in [
            "<html><body>Adrenaline Junkies</body></html>",
            "<html><head><title>Linux Nerds</title></head><body>Reunion</body></html>",
            "<html><body><p class=\"lead\">Penicillin Users</p> Assemble</body></html>",
        ] {
            db.execute("INSERT INTO v1 VALUES (?)", &[Value::from(name)])?;
        }
        let hits = db.query("SELECT * FROM v1 WHERE name MATCH ?", &[Value::from("body")])?;
        report.record("fts_text_1.0", hits.len().to_string(), "0");
        db.close()
    }

    fn fts_test_2(&self, report: &mut SuiteReport) -> DbResult<()> {
        let db = self.fresh()?;
        register_tokenizer("HTMLTokenizer", None)?;
        db.execute(
            "CREATE VIRTUAL TABLE v1 USING fts4(name, tokenize=HTMLTokenizer stemmer=english)",
            &[],
        )?;
        for (_, name) in scenarios::PEOPLE {
            db.execute("INSERT INTO v1 VALUES (?)", &[Value::from(name.replace(" Boss", ""))])?;
        }
        let sql = "SELECT * FROM v1 WHERE name MATCH ?";
        let unite = db.query(sql, &[Value::from("unite")])?.len();
        report.record("fts_text_2.0", unite.to_string(), "2");
        let html = db.query(sql, &[Value::from("html")])?.len();
        report.record("fts_text_2.1", html.to_string(), "0");
        db.close()
    }

    fn fts_test_3(&self, report: &mut SuiteReport) -> DbResult<()> {
        let db = self.fresh()?;
        register_tokenizer("HTMLTokenizer", None)?;
        db.execute(
            "CREATE VIRTUAL TABLE people USING fts4(title, name, tokenize=HTMLTokenizer)",
            &[],
        )?;
        scenarios::insert_people(&db, "people");
        let mut rows = db.query(
            "SELECT * FROM people WHERE people MATCH ? \
             ORDER BY ftsrank(matchinfo(people), 1.0, 0.5) DESC",
            &[Value::from("boss")],
        )?;
        report.record("fts_text_3.0", rows.len().to_string(), "3");
        let title = rows.column_index("title");
        let name = rows.column_index("name");
        match rows.next() {
            Some(first) => {
                let text = |index: Option<usize>| index.and_then(|i| first.text(i)).unwrap_or_default();
                report.record("fts_text_3.1", text(title), "Boss");
                report.record("fts_text_3.2", text(name), "<html> Bob Boss Unites Jobs Boss </html>");
            }
            None => report.warn("fts_text_3", "no rows"),
        }
        db.close()
    }

    fn supp_char_test(&self, report: &mut SuiteReport, name: &str, smiley: char) -> DbResult<()> {
        let db = self.fresh()?;
        db.execute("CREATE TABLE t1(x)", &[])?;
        db.execute(&format!("INSERT INTO t1 VALUES ('a{smiley}b')"), &[])?;
        report.record(
            format!("{name}.{smiley}"),
            joined_column(&db, "SELECT x FROM t1"),
            format!(".a{smiley}b"),
        );
        db.close()
    }

    fn stemmer_check(
        &self,
        report: &mut SuiteReport,
        name: &str,
        language: &str,
        rows: [&str; 2],
        query: &str,
    ) -> DbResult<()> {
        let db = self.fresh()?;
        register_tokenizer("HTMLTokenizer", Some(language))?;
        db.execute("CREATE VIRTUAL TABLE stemmer USING fts4(text, tokenize=HTMLTokenizer)", &[])?;
        for row in rows {
            db.execute("INSERT INTO stemmer VALUES (?)", &[Value::from(row)])?;
        }
        let mut hits = db.query("SELECT * FROM stemmer WHERE text MATCH ?", &[Value::from(query)])?;
        report.record(name, hits.len().to_string(), "1");
        let column = hits.column_index("text");
        let text = hits
            .next()
            .and_then(|row| column.and_then(|i| row.text(i)))
            .unwrap_or_default();
        report.record(name, text, rows[0]);
        db.close()
    }

    fn stemmer_test_1(&self, report: &mut SuiteReport) -> DbResult<()> {
        self.stemmer_check(
            report,
            "stemmerTest1",
            "eng",
            [
                "<html> I NEED TO REPENT </html>",
                "<html> I NEED TO BE FAITHFUL AND OBEDIENT </html>",
            ],
            "REPENTANCE",
        )
    }

    fn stemmer_test_2(&self, report: &mut SuiteReport) -> DbResult<()> {
        self.stemmer_check(
            report,
            "stemmerTest2",
            "spa",
            [
                "<html> TIENE QUE ARREPENTIRSE </html>",
                "<html> NECESSITO UN LLAMAMIENTO </html>",
            ],
            "ARREPENTIMIENTO",
        )
    }

    fn file_cleanup(&self, report: &mut SuiteReport) -> DbResult<()> {
        let removed = delete_database_files(&self.db_path)?;
        report.record("file_cleanup", removed.to_string(), "true");
        Ok(())
    }
}

fn report_version() -> DbResult<String> {
    let db = Connection::open_in_memory()?;
    let version = db.compile_scalar("SELECT sqlite_version()")?.evaluate()?;
    db.close()?;
    Ok(version.unwrap_or_default())
}

struct SecretHelper;

impl OpenCallbacks for SecretHelper {
    fn password(&self) -> Option<String> {
        Some("secret".into())
    }

    fn on_create(&self, connection: &Connection) -> DbResult<()> {
        connection.execute("CREATE TABLE t1(x)", &[]).map(|_| ())
    }

    fn on_upgrade(&self, _connection: &Connection, _old: i32, _new: i32) -> DbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn report_renders_like_the_harness() {
        let mut report = SuiteReport {
            version: "1.2.3".into(),
            ..SuiteReport::default()
        };
        report.record("a", "x", "x");
        report.record("b", "x", "y");
        let text = report.to_string();
        assert!(text.starts_with("CipherLite version 1.2.3\n"));
        assert!(text.contains("a... ok\n"));
        assert!(text.contains("b... FAILED\n   res=     \"x\"\n   expected=\"y\"\n"));
        assert!(text.ends_with("1 errors from 2 tests"));
        assert!(!report.passed());
    }

    #[test]
    fn suite_passes() {
        let dir = tempdir().unwrap();
        let report = FunctionalSuite::new(dir.path()).run();
        assert!(report.passed(), "{report}");
        assert_eq!(report.version, cipherlite_core::VERSION);
        let expected = if has_codec() { "blocked" } else { "concurrent" };
        assert_eq!(report.outcome("thread_test_2").unwrap().result, expected);
        assert!(report.tests() >= 20);
    }
}
