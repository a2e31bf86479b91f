//! Full-text tables: markup stripping, stemming, and ranking.

use cipherlite_core::{register_tokenizer, Connection, Value};
use std::sync::{Mutex, MutexGuard};
use tempfile::tempdir;

/// Serializes tests that depend on the process-wide default language of
/// `HTMLTokenizer`.
fn html_tokenizer(language: Option<&str>) -> MutexGuard<'static, ()> {
    static REGISTRATION: Mutex<()> = Mutex::new(());
    let guard = REGISTRATION.lock().unwrap_or_else(|e| e.into_inner());
    register_tokenizer("HTMLTokenizer", language).unwrap();
    guard
}

fn match_count(conn: &Connection, sql: &str, query: &str) -> usize {
    conn.query(sql, &[Value::from(query)]).unwrap().len()
}

fn first_text(conn: &Connection, sql: &str, query: &str, column: &str) -> Option<String> {
    let mut rows = conn.query(sql, &[Value::from(query)]).unwrap();
    let index = rows.column_index(column)?;
    rows.next()?.text(index)
}

#[test]
fn markup_is_not_searchable() {
    let _registered = html_tokenizer(None);
    let dir = tempdir().unwrap();
    let conn = Connection::open(dir.path().join("fts1.db"), None).unwrap();
    conn.execute("CREATE VIRTUAL TABLE v1 USING fts4(name, tokenize=HTMLTokenizer)", &[])
        .unwrap();
    for name in [
        "<html><body>Adrenaline Junkies</body></html>",
        "<html><head><title>Linux</title></head><body class=\"x\">Nerds</body></html>",
        "<p>Penicillin <i>Users</i> Assemble</p>",
    ] {
        conn.execute("INSERT INTO v1 VALUES (?)", &[Value::from(name)])
            .unwrap();
    }
    let sql = "SELECT * FROM v1 WHERE name MATCH ?";
    assert_eq!(match_count(&conn, sql, "body"), 0);
    assert_eq!(match_count(&conn, sql, "class"), 0);
    assert_eq!(match_count(&conn, sql, "nerds"), 1);
    assert_eq!(match_count(&conn, sql, "users"), 1);
}

#[test]
fn english_stemming_through_markup() {
    let _registered = html_tokenizer(None);
    let conn = Connection::open_in_memory().unwrap();
    conn.execute(
        "CREATE VIRTUAL TABLE v1 USING fts4(name, tokenize=HTMLTokenizer stemmer=english)",
        &[],
    )
    .unwrap();
    for name in [
        "<html> Adrenaline <b>Junkies</b> Unite </html>",
        "<html> Linux Nerds Reunion </html>",
        "<html> Penicillin Users Assemble </html>",
        "<html> Burp Man Returns </html>",
        "<html> Fart Hero Stinks </html>",
        "<html> Sneeze Scars Massage </html>",
        "<html> Leian Solo Falls </html>",
        "<html> Bob Unites Jobs </html>",
    ] {
        conn.execute(&format!("INSERT INTO v1 VALUES('{name}')"), &[])
            .unwrap();
    }
    let sql = "SELECT * FROM v1 WHERE name MATCH ?";
    assert_eq!(match_count(&conn, sql, "unite"), 2);
    assert_eq!(match_count(&conn, sql, "html"), 0);
}

#[test]
fn ranking_puts_the_strongest_match_first() {
    let _registered = html_tokenizer(None);
    let conn = Connection::open_in_memory().unwrap();
    conn.execute(
        "CREATE VIRTUAL TABLE people USING fts4(title, name, tokenize=HTMLTokenizer)",
        &[],
    )
    .unwrap();
    for (title, name) in [
        ("Boss", "<html> Adrenaline <b>Junkies</b> Unite </html>"),
        ("User", "<html> Linux Nerds Reunion </html>"),
        ("User", "<html> Penicillin Users Assemble </html>"),
        ("User", "<html> Burp Boss Man Returns </html>"),
        ("User", "<html> Fart Hero Stinks </html>"),
        ("User", "<html> Sneeze Scars Massage </html>"),
        ("User", "<html> Leian Solo Falls </html>"),
        ("Boss", "<html> Bob Boss Unites Jobs Boss </html>"),
    ] {
        conn.execute(
            "INSERT INTO people VALUES (?, ?)",
            &[Value::from(title), Value::from(name)],
        )
        .unwrap();
    }
    let sql = "SELECT * FROM people WHERE people MATCH ? \
               ORDER BY ftsrank(matchinfo(people), 1.0, 0.5) DESC";
    assert_eq!(match_count(&conn, sql, "boss"), 3);
    assert_eq!(first_text(&conn, sql, "boss", "title").as_deref(), Some("Boss"));
    assert_eq!(
        first_text(&conn, sql, "boss", "name").as_deref(),
        Some("<html> Bob Boss Unites Jobs Boss </html>")
    );

    let ranked: Vec<i64> = conn
        .query(
            "SELECT docid FROM people WHERE people MATCH 'boss' \
             ORDER BY ftsrank(matchinfo(people), 1.0, 0.5) DESC, docid",
            &[],
        )
        .unwrap()
        .filter_map(|row| row.integer(0))
        .collect();
    assert_eq!(ranked.first(), Some(&8));
    assert_eq!(ranked.len(), 3);
}

/// Rows with equal scores keep docid order without a tie-breaking key.
#[test]
fn equal_ranks_keep_docid_order() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute("CREATE VIRTUAL TABLE docs USING fts4(body)", &[])
        .unwrap();
    conn.execute(
        "INSERT INTO docs VALUES ('alpha beta'), ('alpha beta'), ('alpha beta')",
        &[],
    )
    .unwrap();
    conn.execute("DELETE FROM docs WHERE docid = 1", &[]).unwrap();
    conn.execute("INSERT INTO docs VALUES ('alpha beta')", &[]).unwrap();
    conn.execute("INSERT INTO docs VALUES ('alpha alpha')", &[]).unwrap();

    let ranked: Vec<i64> = conn
        .query(
            "SELECT docid FROM docs WHERE docs MATCH 'alpha' \
             ORDER BY ftsrank(matchinfo(docs), 1.0) DESC",
            &[],
        )
        .unwrap()
        .filter_map(|row| row.integer(0))
        .collect();
    assert_eq!(ranked, vec![5, 2, 3, 4]);
}

/// Both languages run in one test: the registered default language is
/// process-wide, and each table keeps the language it was created with.
#[test]
fn registered_language_picks_the_stemmer() {
    let dir = tempdir().unwrap();
    let conn = Connection::open(dir.path().join("stem.db"), None).unwrap();
    let sql = |table: &str| format!("SELECT * FROM {table} WHERE text MATCH ?");

    let registered = html_tokenizer(Some("eng"));
    conn.execute("CREATE VIRTUAL TABLE english USING fts4(text, tokenize=HTMLTokenizer)", &[])
        .unwrap();
    conn.execute(
        "INSERT INTO english VALUES('<html> I NEED TO REPENT </html>'), \
         ('<html> I NEED TO BE FAITHFUL AND OBEDIENT </html>')",
        &[],
    )
    .unwrap();

    register_tokenizer("HTMLTokenizer", Some("spa")).unwrap();
    conn.execute("CREATE VIRTUAL TABLE spanish USING fts4(text, tokenize=HTMLTokenizer)", &[])
        .unwrap();
    conn.execute(
        "INSERT INTO spanish VALUES('<html> TIENE QUE ARREPENTIRSE </html>'), \
         ('<html> NECESSITO UN LLAMAMIENTO </html>')",
        &[],
    )
    .unwrap();
    register_tokenizer("HTMLTokenizer", None).unwrap();
    drop(registered);

    assert_eq!(match_count(&conn, &sql("english"), "REPENTANCE"), 1);
    assert_eq!(
        first_text(&conn, &sql("english"), "REPENTANCE", "text").as_deref(),
        Some("<html> I NEED TO REPENT </html>")
    );
    assert_eq!(match_count(&conn, &sql("spanish"), "ARREPENTIMIENTO"), 1);
    assert_eq!(
        first_text(&conn, &sql("spanish"), "ARREPENTIMIENTO", "text").as_deref(),
        Some("<html> TIENE QUE ARREPENTIRSE </html>")
    );

    conn.execute(
        "INSERT INTO english VALUES('<html> TIENE QUE ARREPENTIRSE </html>')",
        &[],
    )
    .unwrap();
    assert_eq!(match_count(&conn, &sql("english"), "ARREPENTIMIENTO"), 0);

    // The language is part of the table definition and survives reopening.
    let path = conn.path().unwrap().to_path_buf();
    conn.close().unwrap();
    let conn = Connection::open(&path, None).unwrap();
    assert_eq!(match_count(&conn, &sql("spanish"), "ARREPENTIMIENTO"), 1);
}

#[test]
fn phrase_and_boolean_queries() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute("CREATE VIRTUAL TABLE docs USING fts4(body)", &[])
        .unwrap();
    conn.execute(
        "INSERT INTO docs VALUES ('the quick brown fox'), ('quick thinking'), ('brown bread')",
        &[],
    )
    .unwrap();
    let sql = "SELECT docid FROM docs WHERE docs MATCH ? ORDER BY docid";
    let ids = |q: &str| -> Vec<i64> {
        conn.query(sql, &[Value::from(q)])
            .unwrap()
            .filter_map(|row| row.integer(0))
            .collect()
    };
    assert_eq!(ids("quick"), vec![1, 2]);
    assert_eq!(ids("\"quick brown\""), vec![1]);
    assert_eq!(ids("quick brown"), vec![1]);
    assert_eq!(ids("quick OR bread"), vec![1, 2, 3]);
    assert_eq!(ids("brown NOT fox"), vec![3]);
    assert_eq!(ids("qui*"), vec![1, 2]);
}
