//! Data pragmas.
//!
//! Unknown pragmas return no rows.

use super::{Access, Outcome};
use crate::btree;
use crate::error::{DbError, DbResult};
use crate::pager::{PageRead, PageWrite};
use crate::schema::{Schema, SchemaEntry};
use crate::sql::Pragma;
use crate::value::Value;
use std::collections::HashSet;

/// Result column names of a pragma.
pub(crate) fn columns(pragma: &Pragma) -> Vec<String> {
    match pragma.name.as_str() {
        "table_info" => ["cid", "name", "type", "notnull", "dflt_value", "pk"]
            .iter()
            .map(ToString::to_string)
            .collect(),
        "integrity_check" => vec![pragma.name.clone()],
        "table_list" => vec!["name".to_string(), "type".to_string()],
        "user_version" | "page_count" | "freelist_count" | "schema_version"
            if pragma.value.is_none() =>
        {
            vec![pragma.name.clone()]
        }
        _ => Vec::new(),
    }
}

pub(crate) fn run(access: &mut Access<'_>, schema: &Schema, pragma: &Pragma) -> DbResult<Outcome> {
    let header = *access.header();
    let single = |v: i64| Outcome {
        rows: vec![vec![Value::Integer(v)]],
        ..Outcome::default()
    };
    Ok(match (pragma.name.as_str(), pragma.value.as_deref()) {
        ("user_version", None) => single(i64::from(header.user_version)),
        ("user_version", Some(value)) => {
            let version: i32 = value
                .trim()
                .parse()
                .map_err(|_| DbError::compile(format!("bad user_version: {value}")))?;
            access.writer()?.header_mut().user_version = version;
            Outcome::default()
        }
        ("page_count", None) => single(i64::from(header.page_count)),
        ("freelist_count", None) => single(i64::from(header.freelist_count)),
        ("schema_version", None) => single(i64::from(header.schema_cookie)),
        ("table_info", Some(name)) => table_info(schema, name),
        ("table_list", None) => Outcome {
            rows: schema
                .entries()
                .map(|entry| {
                    let kind = match entry {
                        SchemaEntry::Table(_) => "table",
                        SchemaEntry::Fts(_) => "virtual",
                    };
                    vec![Value::from(entry.name()), Value::from(kind)]
                })
                .collect(),
            ..Outcome::default()
        },
        ("integrity_check", _) => {
            let problems = integrity_check(&*access, schema)?;
            let rows = if problems.is_empty() {
                vec![vec![Value::from("ok")]]
            } else {
                problems.into_iter().map(|p| vec![Value::Text(p)]).collect()
            };
            Outcome {
                rows,
                ..Outcome::default()
            }
        }
        _ => Outcome::default(),
    })
}

fn table_info(schema: &Schema, name: &str) -> Outcome {
    let rows = match schema.get(name) {
        Some(SchemaEntry::Table(def)) => def
            .columns
            .iter()
            .enumerate()
            .map(|(cid, c)| {
                vec![
                    Value::Integer(cid as i64),
                    Value::Text(c.name.clone()),
                    Value::Text(c.type_name.clone().unwrap_or_default()),
                    Value::Integer(i64::from(c.not_null)),
                    c.default.clone(),
                    Value::Integer(i64::from(c.primary_key)),
                ]
            })
            .collect(),
        Some(SchemaEntry::Fts(def)) => def
            .columns
            .iter()
            .enumerate()
            .map(|(cid, name)| {
                vec![
                    Value::Integer(cid as i64),
                    Value::Text(name.clone()),
                    Value::from(""),
                    Value::Integer(0),
                    Value::Null,
                    Value::Integer(0),
                ]
            })
            .collect(),
        None => Vec::new(),
    };
    Outcome {
        rows,
        ..Outcome::default()
    }
}

/// Checks that every page except the header page is used exactly once:
/// by the catalog, by a table, or by the free list.
pub(crate) fn integrity_check<P: PageRead + ?Sized>(view: &P, schema: &Schema) -> DbResult<Vec<String>> {
    let header = *view.header();
    let mut problems = Vec::new();
    let mut owners: Vec<(String, Vec<u32>)> = Vec::new();
    if header.schema_root != 0 {
        owners.push(("catalog".into(), btree::pages(view, header.schema_root)?));
    }
    for entry in schema.entries() {
        let mut pages = Vec::new();
        for root in entry.roots() {
            pages.extend(btree::pages(view, root)?);
        }
        owners.push((entry.name().to_string(), pages));
    }

    let mut free = Vec::new();
    let mut next = header.freelist_head;
    while next != 0 && free.len() <= header.freelist_count as usize {
        free.push(next);
        let page = view.page(next)?;
        next = u32::from_be_bytes([page[0], page[1], page[2], page[3]]);
    }
    if free.len() != header.freelist_count as usize {
        problems.push(format!(
            "free list holds {} pages but the header counts {}",
            free.len(),
            header.freelist_count
        ));
    }
    owners.push(("free list".into(), free));

    let mut seen = HashSet::new();
    for (owner, pages) in &owners {
        for page in pages {
            if *page == 0 || *page >= header.page_count {
                problems.push(format!("{owner}: page {page} out of range"));
            } else if !seen.insert(*page) {
                problems.push(format!("{owner}: page {page} referenced twice"));
            }
        }
    }
    for page in 1..header.page_count {
        if !seen.contains(&page) {
            problems.push(format!("page {page} is never used"));
        }
    }
    Ok(problems)
}
