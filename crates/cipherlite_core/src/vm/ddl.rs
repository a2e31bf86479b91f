//! `CREATE TABLE`, `CREATE VIRTUAL TABLE`, and `DROP TABLE`.

use super::expr::{Compiler, Ctx};
use super::{Env, Outcome};
use crate::btree;
use crate::error::{DbError, DbResult};
use crate::fts::{FtsIndex, TokenizerSpec, MODULES};
use crate::pager::WriteTxn;
use crate::schema::{self, rowid_alias, Column, FtsDef, Schema, TableDef};
use crate::sql::{CreateTable, CreateVirtualTable};
use crate::value::{Affinity, Value};
use std::collections::HashSet;
use tracing::debug;

fn evaluate_default(expr: &crate::sql::Expr, column: &str) -> DbResult<Value> {
    let compiled = Compiler::new(None, None).expr(expr)?;
    if !compiled.is_constant() {
        return Err(DbError::compile(format!(
            "default value of column [{column}] is not constant"
        )));
    }
    compiled.eval(&Ctx::new(&Env::default(), None))
}

pub(crate) fn create_table(tx: &mut WriteTxn, schema: &Schema, create: &CreateTable) -> DbResult<Outcome> {
    if schema.get(&create.name).is_some() {
        if create.if_not_exists {
            return Ok(Outcome::default());
        }
        return Err(DbError::compile(format!("table {} already exists", create.name)));
    }
    if create.columns.iter().filter(|c| c.primary_key).count() > 1 {
        return Err(DbError::compile(format!(
            "table \"{}\" has more than one primary key",
            create.name
        )));
    }
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(create.columns.len());
    for def in &create.columns {
        if !seen.insert(def.name.to_ascii_lowercase()) {
            return Err(DbError::compile(format!("duplicate column name: {}", def.name)));
        }
        let default = match &def.default {
            Some(expr) => evaluate_default(expr, &def.name)?,
            None => Value::Null,
        };
        columns.push(Column {
            name: def.name.clone(),
            type_name: def.type_name.clone(),
            affinity: Affinity::from_declared_type(def.type_name.as_deref()),
            primary_key: def.primary_key,
            not_null: def.not_null,
            unique: def.unique,
            default,
        });
    }
    let alias = rowid_alias(&columns);
    let autoincrement = create.columns.iter().any(|c| c.autoincrement);
    if autoincrement && alias.is_none() {
        return Err(DbError::compile(
            "AUTOINCREMENT is only allowed on an INTEGER PRIMARY KEY",
        ));
    }
    for (i, column) in columns.iter_mut().enumerate() {
        if column.primary_key && alias != Some(i) {
            column.unique = true;
        }
    }
    let root = btree::create(tx)?;
    let def = TableDef {
        name: create.name.clone(),
        root,
        columns,
        rowid_alias: alias,
        autoincrement,
    };
    schema::add_table(tx, &def)?;
    debug!(table = %def.name, root, "created table");
    Ok(Outcome::default())
}

fn unquote(word: &str) -> &str {
    let trimmed = word.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('`', '`'), ('[', ']')] {
        if let Some(inner) = trimmed.strip_prefix(open).and_then(|w| w.strip_suffix(close)) {
            return inner;
        }
    }
    trimmed
}

/// Splits the module arguments into column names and the `tokenize` clause.
fn split_fts_args(args: &[String]) -> (Vec<String>, Option<String>, Vec<String>) {
    let mut columns = Vec::new();
    let mut tokenizer = None;
    let mut options = Vec::new();
    for arg in args {
        let arg = arg.trim();
        let is_tokenize = arg.len() > 8
            && arg.is_char_boundary(8)
            && arg[..8].eq_ignore_ascii_case("tokenize")
            && arg[8..].starts_with(|c: char| c == '=' || c.is_whitespace());
        if is_tokenize {
            let rest = arg[8..].trim_start().trim_start_matches('=');
            let mut words = rest.split_whitespace().map(|w| unquote(w).to_string());
            tokenizer = words.next();
            options = words.collect();
        } else if let Some(first) = arg.split_whitespace().next() {
            columns.push(unquote(first).to_string());
        }
    }
    if columns.is_empty() {
        columns.push("content".to_string());
    }
    (columns, tokenizer, options)
}

pub(crate) fn create_virtual_table(
    tx: &mut WriteTxn,
    schema: &Schema,
    create: &CreateVirtualTable,
) -> DbResult<Outcome> {
    let module = create.module.to_ascii_lowercase();
    if !MODULES.contains(&module.as_str()) {
        return Err(DbError::compile(format!("no such module: {}", create.module)));
    }
    if schema.get(&create.name).is_some() {
        if create.if_not_exists {
            return Ok(Outcome::default());
        }
        return Err(DbError::compile(format!("table {} already exists", create.name)));
    }
    let (columns, tokenizer, options) = split_fts_args(&create.args);
    let mut seen = HashSet::new();
    if let Some(duplicate) = columns.iter().find(|c| !seen.insert(c.to_ascii_lowercase())) {
        return Err(DbError::compile(format!("duplicate column name: {duplicate}")));
    }
    let spec = TokenizerSpec::resolve(tokenizer.as_deref(), &options)?;
    spec.instantiate()?;
    let roots = FtsIndex::create_trees(tx)?;
    let def = FtsDef {
        name: create.name.clone(),
        module,
        columns,
        roots,
        tokenizer: spec,
        args: options,
    };
    schema::add_fts(tx, &def)?;
    debug!(
        table = %def.name,
        tokenizer = %def.tokenizer.name,
        language = ?def.tokenizer.language,
        "created full-text table"
    );
    Ok(Outcome::default())
}

pub(crate) fn drop_table(tx: &mut WriteTxn, schema: &Schema, name: &str, if_exists: bool) -> DbResult<Outcome> {
    let Some(entry) = schema.get(name) else {
        if if_exists {
            return Ok(Outcome::default());
        }
        return Err(DbError::compile(format!("no such table: {name}")));
    };
    for root in entry.roots() {
        btree::destroy(tx, root)?;
    }
    schema::remove(tx, name)?;
    debug!(table = %entry.name(), "dropped table");
    Ok(Outcome::default())
}
