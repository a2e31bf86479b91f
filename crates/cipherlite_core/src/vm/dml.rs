//! `INSERT`, `UPDATE`, and `DELETE`.
//!
//! Rows to change are collected before the first write, so a statement never
//! sees its own effects.

use super::expr::{CExpr, Compiler, Ctx, ROWID_NAMES};
use super::select::{SelectPlan, Where};
use super::{decode_table_row, encode_table_row, Env, Outcome, Source};
use crate::btree::{self, Cursor};
use crate::error::{DbError, DbResult};
use crate::fts::FtsIndex;
use crate::pager::WriteTxn;
use crate::schema::{FtsDef, Schema, TableDef};
use crate::sql::{Conflict, Delete, Insert, InsertSource, Update};
use crate::types::{rowid_from_key, rowid_key, RowId};
use crate::value::{Affinity, Value};
use std::cmp::Ordering;

/// Where an assigned value goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Column(usize),
    Rowid,
}

fn resolve_slot(source: &Source, name: &str) -> DbResult<Slot> {
    match source {
        Source::Table(def) => {
            if let Some(i) = def.column_index(name) {
                return Ok(if def.rowid_alias == Some(i) {
                    Slot::Rowid
                } else {
                    Slot::Column(i)
                });
            }
            if ROWID_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                return Ok(Slot::Rowid);
            }
        }
        Source::Fts(def) => {
            if let Some(i) = def.column_index(name) {
                return Ok(Slot::Column(i));
            }
            if name.eq_ignore_ascii_case("docid") || name.eq_ignore_ascii_case("rowid") {
                return Ok(Slot::Rowid);
            }
        }
    }
    Err(DbError::compile(format!(
        "table {} has no column named {name}",
        source.name()
    )))
}

fn integer_rowid(value: Value) -> DbResult<RowId> {
    match value.with_affinity(Affinity::Integer) {
        Value::Integer(i) => Ok(i),
        _ => Err(DbError::runtime("datatype mismatch")),
    }
}

fn rowid_column(def: &TableDef) -> &str {
    def.rowid_alias
        .map_or("rowid", |i| def.columns[i].name.as_str())
}

fn unique_failed(table: &str, column: &str) -> DbError {
    DbError::constraint(format!("UNIQUE constraint failed: {table}.{column}"))
}

/// Applies column affinities and checks `NOT NULL`. Returns the violating
/// column, if any.
fn prepare_row<'d>(def: &'d TableDef, values: &mut [Value], rowid: RowId) -> Option<&'d str> {
    for (value, column) in values.iter_mut().zip(&def.columns) {
        *value = std::mem::replace(value, Value::Null).with_affinity(column.affinity);
    }
    if let Some(alias) = def.rowid_alias {
        values[alias] = Value::Integer(rowid);
    }
    def.columns
        .iter()
        .zip(values.iter())
        .find(|(column, value)| column.not_null && value.is_null())
        .map(|(column, _)| column.name.as_str())
}

/// Rows other than `exclude` holding the same value in a unique column,
/// with the first clashing column's name.
fn unique_clashes(
    tx: &WriteTxn,
    def: &TableDef,
    exclude: RowId,
    values: &[Value],
) -> DbResult<(Vec<RowId>, Option<String>)> {
    let checked: Vec<usize> = def
        .columns
        .iter()
        .enumerate()
        .filter(|(i, c)| c.unique && def.rowid_alias != Some(*i) && !values[*i].is_null())
        .map(|(i, _)| i)
        .collect();
    let mut clashes = Vec::new();
    let mut first = None;
    if checked.is_empty() {
        return Ok((clashes, first));
    }
    let mut cursor = Cursor::new(tx, def.root);
    cursor.first()?;
    while let Some(key) = cursor.key() {
        let rowid = rowid_from_key(key)
            .ok_or_else(|| DbError::malformed(format!("bad row key in table {}", def.name)))?;
        if rowid != exclude {
            let row = decode_table_row(def, rowid, &cursor.value()?)?;
            if let Some(i) = checked
                .iter()
                .find(|i| row.values[**i].compare(&values[**i]) == Ordering::Equal)
            {
                first.get_or_insert_with(|| def.columns[*i].name.clone());
                clashes.push(rowid);
            }
        }
        cursor.next()?;
    }
    Ok((clashes, first))
}

enum InsertRows {
    Values(Vec<Vec<CExpr>>),
    Select(Box<SelectPlan>),
    Defaults,
}

/// A compiled `INSERT`.
pub(crate) struct InsertPlan {
    target: Source,
    slots: Vec<Slot>,
    rows: InsertRows,
    conflict: Conflict,
}

impl InsertPlan {
    pub fn compile(insert: &Insert, schema: &Schema) -> DbResult<Self> {
        let target = Source::resolve(schema, &insert.table)?;
        let slots = match &insert.columns {
            Some(names) => names
                .iter()
                .map(|n| resolve_slot(&target, n))
                .collect::<DbResult<Vec<_>>>()?,
            None => target
                .column_names()
                .iter()
                .map(|n| resolve_slot(&target, n))
                .collect::<DbResult<Vec<_>>>()?,
        };
        let arity_error = |supplied: usize| {
            DbError::compile(match &insert.columns {
                Some(_) => format!("{supplied} values for {} columns", slots.len()),
                None => format!(
                    "table {} has {} columns but {supplied} values were supplied",
                    target.name(),
                    slots.len()
                ),
            })
        };
        let rows = match &insert.source {
            InsertSource::Values(rows) => {
                let mut compiler = Compiler::new(None, None);
                let mut compiled = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.len() != slots.len() {
                        return Err(arity_error(row.len()));
                    }
                    compiled.push(
                        row.iter()
                            .map(|e| compiler.expr(e))
                            .collect::<DbResult<Vec<_>>>()?,
                    );
                }
                InsertRows::Values(compiled)
            }
            InsertSource::Select(select) => {
                let plan = SelectPlan::compile(select, schema)?;
                if plan.columns().len() != slots.len() {
                    return Err(arity_error(plan.columns().len()));
                }
                InsertRows::Select(Box::new(plan))
            }
            InsertSource::DefaultValues => InsertRows::Defaults,
        };
        Ok(Self {
            target,
            slots,
            rows,
            conflict: insert.conflict,
        })
    }

    pub fn run(&self, tx: &mut WriteTxn, env: &Env<'_>) -> DbResult<Outcome> {
        let rows: Vec<Vec<Value>> = match &self.rows {
            InsertRows::Values(rows) => rows
                .iter()
                .map(|row| row.iter().map(|e| e.eval(&Ctx::new(env, None))).collect())
                .collect::<DbResult<_>>()?,
            InsertRows::Select(plan) => plan.run(&*tx, env)?,
            InsertRows::Defaults => vec![Vec::new()],
        };
        let index = match &self.target {
            Source::Fts(def) => Some(def.index()?),
            Source::Table(_) => None,
        };
        let mut changes = 0;
        let mut last = None;
        for values in rows {
            let inserted = match (&self.target, &index) {
                (Source::Fts(def), Some(index)) => self.insert_fts(tx, def, index, values)?,
                (Source::Table(def), _) => self.insert_table(tx, def, values)?,
                (Source::Fts(_), None) => None,
            };
            if let Some(rowid) = inserted {
                changes += 1;
                last = Some(rowid);
            }
        }
        Ok(Outcome {
            changes: Some(changes),
            last_insert_rowid: last,
            ..Outcome::default()
        })
    }

    fn place(&self, width: usize, defaults: impl Fn(usize) -> Value, values: Vec<Value>) -> (Vec<Value>, Option<Value>) {
        let mut record: Vec<Value> = (0..width).map(defaults).collect();
        let mut rowid = None;
        for (slot, value) in self.slots.iter().zip(values) {
            match slot {
                Slot::Column(i) => record[*i] = value,
                Slot::Rowid => rowid = Some(value),
            }
        }
        (record, rowid)
    }

    fn insert_table(&self, tx: &mut WriteTxn, def: &TableDef, values: Vec<Value>) -> DbResult<Option<RowId>> {
        let (mut record, explicit) = self.place(def.columns.len(), |i| def.columns[i].default.clone(), values);
        let rowid = match explicit {
            None | Some(Value::Null) => btree::next_rowid(tx, def.root)?,
            Some(v) => integer_rowid(v)?,
        };
        if let Some(column) = prepare_row(def, &mut record, rowid) {
            if self.conflict == Conflict::Ignore {
                return Ok(None);
            }
            return Err(DbError::constraint(format!(
                "NOT NULL constraint failed: {}.{column}",
                def.name
            )));
        }
        let key = rowid_key(rowid);
        if btree::get(tx, def.root, &key)?.is_some() {
            match self.conflict {
                Conflict::Abort => return Err(unique_failed(&def.name, rowid_column(def))),
                Conflict::Ignore => return Ok(None),
                Conflict::Replace => {
                    btree::delete(tx, def.root, &key)?;
                }
            }
        }
        if def.has_unique() {
            let (clashes, column) = unique_clashes(tx, def, rowid, &record)?;
            if let Some(column) = column {
                match self.conflict {
                    Conflict::Abort => return Err(unique_failed(&def.name, &column)),
                    Conflict::Ignore => return Ok(None),
                    Conflict::Replace => {
                        for old in clashes {
                            btree::delete(tx, def.root, &rowid_key(old))?;
                        }
                    }
                }
            }
        }
        btree::insert(tx, def.root, &key, &encode_table_row(def, &record))?;
        Ok(Some(rowid))
    }

    fn insert_fts(
        &self,
        tx: &mut WriteTxn,
        def: &FtsDef,
        index: &FtsIndex,
        values: Vec<Value>,
    ) -> DbResult<Option<RowId>> {
        let (record, explicit) = self.place(def.columns.len(), |_| Value::Null, values);
        let rowid = match explicit {
            None | Some(Value::Null) => None,
            Some(v) => Some(integer_rowid(v)?),
        };
        if let Some(rowid) = rowid {
            if index.contains(tx, rowid)? {
                match self.conflict {
                    Conflict::Abort => return Err(unique_failed(&def.name, "rowid")),
                    Conflict::Ignore => return Ok(None),
                    Conflict::Replace => {
                        index.delete(tx, rowid)?;
                    }
                }
            }
        }
        index.insert(tx, rowid, record).map(Some)
    }
}

/// A compiled `UPDATE`.
pub(crate) struct UpdatePlan {
    target: Source,
    assignments: Vec<(Slot, CExpr)>,
    filter: Where,
}

impl UpdatePlan {
    pub fn compile(update: &Update, schema: &Schema) -> DbResult<Self> {
        let target = Source::resolve(schema, &update.table)?;
        let mut compiler = Compiler::new(Some(&target), None);
        let mut assignments = Vec::with_capacity(update.assignments.len());
        for (name, expr) in &update.assignments {
            assignments.push((resolve_slot(&target, name)?, compiler.expr(expr)?));
        }
        let filter = Where::compile(&mut compiler, update.where_clause.as_ref())?;
        Ok(Self {
            target,
            assignments,
            filter,
        })
    }

    pub fn run(&self, tx: &mut WriteTxn, env: &Env<'_>) -> DbResult<Outcome> {
        let rows = self.filter.rows(&*tx, &self.target, env)?;
        let index = match &self.target {
            Source::Fts(def) => Some(def.index()?),
            Source::Table(_) => None,
        };
        let mut changes = 0;
        for row in rows {
            let ctx = Ctx::new(env, Some(&row));
            let mut values = row.values.clone();
            let mut rowid = row.rowid;
            for (slot, expr) in &self.assignments {
                let value = expr.eval(&ctx)?;
                match slot {
                    Slot::Column(i) => values[*i] = value,
                    Slot::Rowid => rowid = integer_rowid(value)?,
                }
            }
            match (&self.target, &index) {
                (Source::Table(def), _) => {
                    if let Some(column) = prepare_row(def, &mut values, rowid) {
                        return Err(DbError::constraint(format!(
                            "NOT NULL constraint failed: {}.{column}",
                            def.name
                        )));
                    }
                    let key = rowid_key(rowid);
                    if rowid != row.rowid && btree::get(tx, def.root, &key)?.is_some() {
                        return Err(unique_failed(&def.name, rowid_column(def)));
                    }
                    if def.has_unique() {
                        if let (_, Some(column)) = unique_clashes(tx, def, row.rowid, &values)? {
                            return Err(unique_failed(&def.name, &column));
                        }
                    }
                    if rowid != row.rowid {
                        btree::delete(tx, def.root, &rowid_key(row.rowid))?;
                    }
                    btree::insert(tx, def.root, &key, &encode_table_row(def, &values))?;
                }
                (Source::Fts(def), Some(index)) => {
                    if rowid != row.rowid && index.contains(tx, rowid)? {
                        return Err(unique_failed(&def.name, "rowid"));
                    }
                    index.delete(tx, row.rowid)?;
                    index.insert(tx, Some(rowid), values)?;
                }
                (Source::Fts(_), None) => continue,
            }
            changes += 1;
        }
        Ok(Outcome {
            changes: Some(changes),
            ..Outcome::default()
        })
    }
}

/// A compiled `DELETE`.
pub(crate) struct DeletePlan {
    target: Source,
    filter: Where,
    everything: bool,
}

impl DeletePlan {
    pub fn compile(delete: &Delete, schema: &Schema) -> DbResult<Self> {
        let target = Source::resolve(schema, &delete.table)?;
        let mut compiler = Compiler::new(Some(&target), None);
        let filter = Where::compile(&mut compiler, delete.where_clause.as_ref())?;
        Ok(Self {
            everything: delete.where_clause.is_none(),
            target,
            filter,
        })
    }

    pub fn run(&self, tx: &mut WriteTxn, env: &Env<'_>) -> DbResult<Outcome> {
        let changes = match &self.target {
            Source::Table(def) if self.everything => {
                let count = btree::count(tx, def.root)?;
                btree::clear(tx, def.root)?;
                count
            }
            Source::Fts(def) if self.everything => def.index()?.clear(tx)?,
            Source::Table(def) => {
                let rows = self.filter.rows(&*tx, &self.target, env)?;
                for row in &rows {
                    btree::delete(tx, def.root, &rowid_key(row.rowid))?;
                }
                rows.len() as u64
            }
            Source::Fts(def) => {
                let index = def.index()?;
                let rows = self.filter.rows(&*tx, &self.target, env)?;
                for row in &rows {
                    index.delete(tx, row.rowid)?;
                }
                rows.len() as u64
            }
        };
        Ok(Outcome {
            changes: Some(changes),
            ..Outcome::default()
        })
    }
}
