//! `SELECT`, and the row access paths shared with `UPDATE` and `DELETE`.

use super::expr::{CExpr, Compiler, Ctx};
use super::func::{AggSpec, AggState};
use super::{decode_table_row, Env, Source, SourceRow};
use crate::btree::{self, Cursor};
use crate::error::{DbError, DbResult};
use crate::pager::PageRead;
use crate::record::encode_record;
use crate::schema::Schema;
use crate::sql::{BinaryOp, Expr, ResultColumn, Select};
use crate::types::{rowid_from_key, rowid_key};
use crate::value::{Affinity, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

fn match_misuse() -> DbError {
    DbError::compile("unable to use function MATCH in the requested context")
}

/// How rows are located.
#[derive(Debug)]
pub(crate) enum Scan {
    /// Every row in row id order.
    Full,
    /// At most one row, by row id.
    Rowid(CExpr),
    /// Rows matching a full-text query, in row id order.
    Match { column: Option<usize>, query: CExpr },
}

/// A compiled `WHERE` clause: an access path plus residual filters.
#[derive(Debug)]
pub(crate) struct Where {
    scan: Scan,
    filters: Vec<CExpr>,
}

fn conjuncts<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        other => out.push(other),
    }
}

impl Where {
    pub fn compile(compiler: &mut Compiler<'_>, clause: Option<&Expr>) -> DbResult<Self> {
        let mut terms = Vec::new();
        if let Some(clause) = clause {
            conjuncts(clause, &mut terms);
        }
        let mut scan = Scan::Full;
        let mut rest = Vec::new();
        for term in terms {
            match term {
                Expr::Binary {
                    op: BinaryOp::Match,
                    left,
                    right,
                } => {
                    let column = compiler.match_target(left).ok_or_else(match_misuse)?;
                    let query = compiler.expr(right)?;
                    if !matches!(scan, Scan::Full) || !query.is_constant() {
                        return Err(match_misuse());
                    }
                    scan = Scan::Match { column, query };
                }
                other => rest.push(other),
            }
        }
        let mut filters = Vec::new();
        for term in rest {
            if matches!(scan, Scan::Full) {
                if let Some(key) = Self::rowid_lookup(compiler, term)? {
                    scan = Scan::Rowid(key);
                    continue;
                }
            }
            filters.push(compiler.expr(term)?);
        }
        Ok(Self { scan, filters })
    }

    /// `rowid = <constant>` in either order.
    fn rowid_lookup(compiler: &mut Compiler<'_>, term: &Expr) -> DbResult<Option<CExpr>> {
        let Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } = term
        else {
            return Ok(None);
        };
        for (column, key) in [(left, right), (right, left)] {
            if !matches!(column.as_ref(), Expr::Column { .. }) {
                continue;
            }
            if matches!(compiler.expr(column)?, CExpr::Rowid) {
                let key = compiler.expr(key)?;
                if key.is_constant() {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    fn accepts(&self, ctx: &Ctx<'_>) -> DbResult<bool> {
        for filter in &self.filters {
            if filter.eval(ctx)?.truthiness() != Some(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Every row of `source` the clause selects.
    pub fn rows<P: PageRead + ?Sized>(
        &self,
        view: &P,
        source: &Source,
        env: &Env<'_>,
    ) -> DbResult<Vec<SourceRow>> {
        let mut out = Vec::new();
        for row in self.candidates(view, source, env)? {
            if self.accepts(&Ctx::new(env, Some(&row)))? {
                out.push(row);
            }
        }
        Ok(out)
    }

    fn candidates<P: PageRead + ?Sized>(
        &self,
        view: &P,
        source: &Source,
        env: &Env<'_>,
    ) -> DbResult<Vec<SourceRow>> {
        let constant = |e: &CExpr| e.eval(&Ctx::new(env, None));
        match (source, &self.scan) {
            (Source::Table(def), Scan::Full) => {
                let mut rows = Vec::new();
                let mut cursor = Cursor::new(view, def.root);
                cursor.first()?;
                while let Some(key) = cursor.key() {
                    let rowid = rowid_from_key(key)
                        .ok_or_else(|| DbError::malformed(format!("bad row key in table {}", def.name)))?;
                    rows.push(decode_table_row(def, rowid, &cursor.value()?)?);
                    cursor.next()?;
                }
                Ok(rows)
            }
            (Source::Table(def), Scan::Rowid(key)) => {
                let Value::Integer(rowid) = constant(key)?.with_affinity(Affinity::Integer) else {
                    return Ok(Vec::new());
                };
                match btree::get(view, def.root, &rowid_key(rowid))? {
                    Some(data) => Ok(vec![decode_table_row(def, rowid, &data)?]),
                    None => Ok(Vec::new()),
                }
            }
            (Source::Table(_), Scan::Match { .. }) => Err(match_misuse()),
            (Source::Fts(def), scan) => {
                let index = def.index()?;
                Ok(match scan {
                    Scan::Full => index
                        .scan(view)?
                        .into_iter()
                        .map(|(rowid, values)| SourceRow {
                            rowid,
                            values,
                            hit: None,
                        })
                        .collect(),
                    Scan::Rowid(key) => {
                        let Value::Integer(rowid) = constant(key)?.with_affinity(Affinity::Integer) else {
                            return Ok(Vec::new());
                        };
                        index
                            .get(view, rowid)?
                            .map(|values| SourceRow {
                                rowid,
                                values,
                                hit: None,
                            })
                            .into_iter()
                            .collect()
                    }
                    Scan::Match { column, query } => {
                        let Some(text) = constant(query)?.to_text() else {
                            return Ok(Vec::new());
                        };
                        index
                            .search(view, &text, *column)?
                            .into_iter()
                            .map(|hit| SourceRow {
                                rowid: hit.rowid,
                                values: hit.values.clone(),
                                hit: Some(hit),
                            })
                            .collect()
                    }
                })
            }
        }
    }
}

#[derive(Debug)]
enum OrderKey {
    Output(usize),
    Expr(CExpr),
}

/// A compiled `SELECT`.
#[derive(Debug)]
pub(crate) struct SelectPlan {
    source: Option<Source>,
    filter: Where,
    outputs: Vec<CExpr>,
    columns: Vec<String>,
    aggregates: Vec<AggSpec>,
    grouped: bool,
    group_by: Vec<CExpr>,
    having: Option<CExpr>,
    order_by: Vec<(OrderKey, bool)>,
    distinct: bool,
    limit: Option<CExpr>,
    offset: Option<CExpr>,
}

struct Group<'r> {
    key: Vec<Value>,
    states: Vec<AggState>,
    last: Option<&'r SourceRow>,
}

struct Emitted {
    values: Vec<Value>,
    keys: Vec<Value>,
}

fn compare_lists(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.compare(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

impl SelectPlan {
    pub fn compile(select: &Select, schema: &Schema) -> DbResult<Self> {
        let source = select
            .from
            .as_ref()
            .map(|t| Source::resolve(schema, &t.name))
            .transpose()?;
        let alias = select.from.as_ref().and_then(|t| t.alias.as_deref());

        let mut plain = Compiler::new(source.as_ref(), alias);
        let filter = Where::compile(&mut plain, select.where_clause.as_ref())?;
        let group_by = select
            .group_by
            .iter()
            .map(|e| plain.expr(e))
            .collect::<DbResult<Vec<_>>>()?;

        let mut compiler = Compiler::new(source.as_ref(), alias).with_aggregates();
        let mut outputs = Vec::new();
        let mut columns = Vec::new();
        for column in &select.columns {
            match column {
                ResultColumn::Star | ResultColumn::TableStar(_) => {
                    let Some(source) = &source else {
                        return Err(DbError::compile("no tables specified"));
                    };
                    let qualifier = match column {
                        ResultColumn::TableStar(t) => Some(t.as_str()),
                        _ => None,
                    };
                    for name in source.column_names() {
                        outputs.push(
                            compiler
                                .column(qualifier, &name)
                                .map_err(|_| DbError::compile(format!("no such table: {}", qualifier.unwrap_or_default())))?,
                        );
                        columns.push(name);
                    }
                }
                ResultColumn::Expr { expr, alias, text } => {
                    outputs.push(compiler.expr(expr)?);
                    columns.push(match (alias, expr) {
                        (Some(alias), _) => alias.clone(),
                        (None, Expr::Column { name, .. }) => name.clone(),
                        (None, _) => text.clone(),
                    });
                }
            }
        }

        let having = select.having.as_ref().map(|h| compiler.expr(h)).transpose()?;

        let mut order_by = Vec::new();
        for term in &select.order_by {
            let key = match &term.expr {
                Expr::Literal(Value::Integer(k)) => {
                    if *k < 1 || *k as usize > outputs.len() {
                        return Err(DbError::compile(format!(
                            "ORDER BY term out of range - should be between 1 and {}",
                            outputs.len()
                        )));
                    }
                    OrderKey::Output(*k as usize - 1)
                }
                Expr::Column { table: None, name } => {
                    let aliased = select.columns.iter().position(|c| {
                        matches!(c, ResultColumn::Expr { alias: Some(a), .. } if a.eq_ignore_ascii_case(name))
                    });
                    match aliased {
                        Some(i) => OrderKey::Output(i),
                        None => OrderKey::Expr(compiler.expr(&term.expr)?),
                    }
                }
                other => OrderKey::Expr(compiler.expr(other)?),
            };
            order_by.push((key, term.descending));
        }

        let mut constant = Compiler::new(None, None);
        let limit = select.limit.as_ref().map(|e| constant.expr(e)).transpose()?;
        let offset = select.offset.as_ref().map(|e| constant.expr(e)).transpose()?;

        let aggregates = std::mem::take(&mut compiler.aggregates);
        let grouped = !group_by.is_empty() || !aggregates.is_empty() || having.is_some();
        Ok(Self {
            source,
            filter,
            outputs,
            columns,
            aggregates,
            grouped,
            group_by,
            having,
            order_by,
            distinct: select.distinct,
            limit,
            offset,
        })
    }

    /// Result column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn emit(&self, ctx: &Ctx<'_>, out: &mut Vec<Emitted>) -> DbResult<()> {
        let values = self
            .outputs
            .iter()
            .map(|e| e.eval(ctx))
            .collect::<DbResult<Vec<_>>>()?;
        let mut keys = Vec::with_capacity(self.order_by.len());
        for (key, _) in &self.order_by {
            keys.push(match key {
                OrderKey::Output(i) => values[*i].clone(),
                OrderKey::Expr(e) => e.eval(ctx)?,
            });
        }
        out.push(Emitted { values, keys });
        Ok(())
    }

    fn bound(&self, expr: Option<&CExpr>, env: &Env<'_>) -> DbResult<Option<usize>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match expr.eval(&Ctx::new(env, None))?.with_affinity(Affinity::Integer) {
            Value::Integer(n) => Ok(usize::try_from(n).ok()),
            _ => Err(DbError::runtime("datatype mismatch")),
        }
    }

    /// Runs the query and returns every result row.
    pub fn run<P: PageRead + ?Sized>(&self, view: &P, env: &Env<'_>) -> DbResult<Vec<Vec<Value>>> {
        let rows = match &self.source {
            Some(source) => self.filter.rows(view, source, env)?,
            None => Vec::new(),
        };
        let inputs: Vec<Option<&SourceRow>> = match &self.source {
            Some(_) => rows.iter().map(Some).collect(),
            None if self.filter.accepts(&Ctx::new(env, None))? => vec![None],
            None => Vec::new(),
        };

        let mut out = Vec::new();
        if self.grouped {
            let mut groups: Vec<Group<'_>> = Vec::new();
            let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
            for row in inputs {
                let ctx = Ctx::new(env, row);
                let key = self
                    .group_by
                    .iter()
                    .map(|e| e.eval(&ctx))
                    .collect::<DbResult<Vec<_>>>()?;
                let slot = *index.entry(encode_record(&key)).or_insert_with(|| {
                    groups.push(Group {
                        key,
                        states: self.aggregates.iter().map(AggSpec::start).collect(),
                        last: None,
                    });
                    groups.len() - 1
                });
                let group = &mut groups[slot];
                for (spec, state) in self.aggregates.iter().zip(&mut group.states) {
                    spec.step(state, &ctx)?;
                }
                group.last = row;
            }
            if groups.is_empty() && self.group_by.is_empty() {
                groups.push(Group {
                    key: Vec::new(),
                    states: self.aggregates.iter().map(AggSpec::start).collect(),
                    last: None,
                });
            }
            groups.sort_by(|a, b| compare_lists(&a.key, &b.key));
            for group in groups {
                let finals = self
                    .aggregates
                    .iter()
                    .zip(group.states)
                    .map(|(spec, state)| spec.finish(state))
                    .collect::<DbResult<Vec<_>>>()?;
                let ctx = Ctx {
                    env,
                    row: group.last,
                    aggregates: &finals,
                };
                if let Some(having) = &self.having {
                    if having.eval(&ctx)?.truthiness() != Some(true) {
                        continue;
                    }
                }
                self.emit(&ctx, &mut out)?;
            }
        } else {
            for row in inputs {
                self.emit(&Ctx::new(env, row), &mut out)?;
            }
        }

        if self.distinct {
            let mut seen = HashSet::new();
            out.retain(|e| seen.insert(encode_record(&e.values)));
        }
        if !self.order_by.is_empty() {
            out.sort_by(|a, b| {
                for (i, (_, descending)) in self.order_by.iter().enumerate() {
                    let ordering = a.keys[i].compare(&b.keys[i]);
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        let offset = self.bound(self.offset.as_ref(), env)?.unwrap_or(0);
        let limit = self.bound(self.limit.as_ref(), env)?.unwrap_or(usize::MAX);
        Ok(out
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.values)
            .collect())
    }
}
