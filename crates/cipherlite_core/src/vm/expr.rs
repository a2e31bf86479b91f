//! Expression compilation and evaluation.
//!
//! Names are resolved once, at compile time, against the statement's single
//! source table. Evaluation then works on positional row values.

use super::func::{self, AggFunc, AggSpec, Scalar};
use super::{Env, Source, SourceRow};
use crate::error::{DbError, DbResult};
use crate::fts::{rank_function, RankFn};
use crate::sql::{BinaryOp, Expr, UnaryOp};
use crate::value::{Affinity, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Row id column names of ordinary tables.
pub(crate) const ROWID_NAMES: &[&str] = &["rowid", "_rowid_", "oid"];

/// A compiled expression.
#[derive(Clone)]
pub(crate) enum CExpr {
    Literal(Value),
    Param(usize),
    Column(usize, Affinity),
    Rowid,
    /// Applies an affinity to the operand, for comparisons against columns.
    Coerce(Box<CExpr>, Affinity),
    Unary(UnaryOp, Box<CExpr>),
    Binary(BinaryOp, Box<CExpr>, Box<CExpr>),
    IsNull(Box<CExpr>, bool),
    Like {
        expr: Box<CExpr>,
        pattern: Box<CExpr>,
        negated: bool,
        glob: bool,
    },
    InList {
        expr: Box<CExpr>,
        list: Vec<CExpr>,
        negated: bool,
    },
    Between {
        expr: Box<CExpr>,
        low: Box<CExpr>,
        high: Box<CExpr>,
        negated: bool,
    },
    Cast(Box<CExpr>, Affinity),
    Case {
        operand: Option<Box<CExpr>>,
        whens: Vec<(CExpr, CExpr)>,
        else_expr: Option<Box<CExpr>>,
    },
    Scalar(Scalar, Vec<CExpr>),
    Aggregate(usize),
    MatchInfo(String),
    Rank(Arc<dyn RankFn>, Vec<CExpr>),
}

impl fmt::Debug for CExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "Literal({v:?})"),
            Self::Param(i) => write!(f, "Param({i})"),
            Self::Column(i, _) => write!(f, "Column({i})"),
            Self::Rowid => f.write_str("Rowid"),
            Self::Aggregate(i) => write!(f, "Aggregate({i})"),
            Self::MatchInfo(format) => write!(f, "MatchInfo({format:?})"),
            _ => f.write_str("CExpr(..)"),
        }
    }
}

/// Values visible to an expression.
pub(crate) struct Ctx<'a> {
    pub env: &'a Env<'a>,
    pub row: Option<&'a SourceRow>,
    pub aggregates: &'a [Value],
}

impl<'a> Ctx<'a> {
    pub fn new(env: &'a Env<'a>, row: Option<&'a SourceRow>) -> Self {
        Self {
            env,
            row,
            aggregates: &[],
        }
    }
}

/// Name-resolving compiler for one statement.
pub(crate) struct Compiler<'s> {
    source: Option<&'s Source>,
    alias: Option<&'s str>,
    allow_aggregates: bool,
    in_aggregate: bool,
    pub aggregates: Vec<AggSpec>,
}

fn bool_value(b: bool) -> Value {
    Value::Integer(i64::from(b))
}

fn is_numeric_affinity(a: Option<Affinity>) -> bool {
    matches!(
        a,
        Some(Affinity::Numeric | Affinity::Integer | Affinity::Real)
    )
}

impl<'s> Compiler<'s> {
    pub fn new(source: Option<&'s Source>, alias: Option<&'s str>) -> Self {
        Self {
            source,
            alias,
            allow_aggregates: false,
            in_aggregate: false,
            aggregates: Vec::new(),
        }
    }

    /// Compiler that accepts aggregate functions.
    pub fn with_aggregates(mut self) -> Self {
        self.allow_aggregates = true;
        self
    }

    fn table_matches(&self, qualifier: &str) -> bool {
        let name_matches = self
            .source
            .is_some_and(|s| s.name().eq_ignore_ascii_case(qualifier));
        match self.alias {
            Some(alias) => alias.eq_ignore_ascii_case(qualifier),
            None => name_matches,
        }
    }

    /// Resolves a column reference.
    pub fn column(&self, table: Option<&str>, name: &str) -> DbResult<CExpr> {
        let display = match table {
            Some(t) => format!("{t}.{name}"),
            None => name.to_string(),
        };
        let no_such = || DbError::compile(format!("no such column: {display}"));
        if table.is_some_and(|t| !self.table_matches(t)) {
            return Err(no_such());
        }
        match self.source {
            None => Err(no_such()),
            Some(Source::Table(def)) => {
                if let Some(i) = def.column_index(name) {
                    if def.rowid_alias == Some(i) {
                        return Ok(CExpr::Rowid);
                    }
                    return Ok(CExpr::Column(i, def.columns[i].affinity));
                }
                if ROWID_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                    return Ok(CExpr::Rowid);
                }
                Err(no_such())
            }
            Some(Source::Fts(def)) => {
                if let Some(i) = def.column_index(name) {
                    return Ok(CExpr::Column(i, Affinity::Blob));
                }
                if name.eq_ignore_ascii_case("docid") || name.eq_ignore_ascii_case("rowid") {
                    return Ok(CExpr::Rowid);
                }
                if name.eq_ignore_ascii_case(&def.name) {
                    return Ok(CExpr::Literal(Value::Null));
                }
                Err(no_such())
            }
        }
    }

    /// Which column a `MATCH` left operand targets: `Some(None)` for the
    /// table-named column, `Some(Some(i))` for a user column.
    pub fn match_target(&self, expr: &Expr) -> Option<Option<usize>> {
        let Some(Source::Fts(def)) = self.source else {
            return None;
        };
        let Expr::Column { table, name } = expr else {
            return None;
        };
        if table.as_deref().is_some_and(|t| !self.table_matches(t)) {
            return None;
        }
        if let Some(i) = def.column_index(name) {
            return Some(Some(i));
        }
        let own_name = self.alias.unwrap_or(&def.name);
        (name.eq_ignore_ascii_case(own_name) || name.eq_ignore_ascii_case(&def.name)).then_some(None)
    }

    fn affinity_of(expr: &CExpr) -> Option<Affinity> {
        match expr {
            CExpr::Column(_, a) => Some(*a).filter(|a| *a != Affinity::Blob),
            CExpr::Rowid => Some(Affinity::Integer),
            CExpr::Cast(_, a) => Some(*a),
            _ => None,
        }
    }

    /// Applies comparison affinity: a numeric column converts the other side
    /// to a number, a text column converts an affinity-less side to text.
    fn coerce_pair(left: CExpr, right: CExpr) -> (CExpr, CExpr) {
        let (la, ra) = (Self::affinity_of(&left), Self::affinity_of(&right));
        let wrap = |e: CExpr, a: Affinity| CExpr::Coerce(Box::new(e), a);
        if is_numeric_affinity(la) && !is_numeric_affinity(ra) {
            (left, wrap(right, Affinity::Numeric))
        } else if is_numeric_affinity(ra) && !is_numeric_affinity(la) {
            (wrap(left, Affinity::Numeric), right)
        } else if la == Some(Affinity::Text) && ra.is_none() {
            (left, wrap(right, Affinity::Text))
        } else if ra == Some(Affinity::Text) && la.is_none() {
            (wrap(left, Affinity::Text), right)
        } else {
            (left, right)
        }
    }

    fn boxed(&mut self, expr: &Expr) -> DbResult<Box<CExpr>> {
        self.expr(expr).map(Box::new)
    }

    /// Compiles an expression.
    pub fn expr(&mut self, expr: &Expr) -> DbResult<CExpr> {
        Ok(match expr {
            Expr::Literal(v) => CExpr::Literal(v.clone()),
            Expr::Param(i) => CExpr::Param(*i),
            Expr::Column { table, name } => self.column(table.as_deref(), name)?,
            Expr::Unary { op, expr } => CExpr::Unary(*op, self.boxed(expr)?),
            Expr::Binary {
                op: BinaryOp::Match,
                ..
            } => {
                return Err(DbError::compile(
                    "unable to use function MATCH in the requested context",
                ))
            }
            Expr::Binary { op, left, right } => {
                let (l, r) = (self.expr(left)?, self.expr(right)?);
                let (l, r) = match op {
                    BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Is
                    | BinaryOp::IsNot
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge => Self::coerce_pair(l, r),
                    _ => (l, r),
                };
                CExpr::Binary(*op, Box::new(l), Box::new(r))
            }
            Expr::IsNull { expr, negated } => CExpr::IsNull(self.boxed(expr)?, *negated),
            Expr::Like {
                expr,
                pattern,
                negated,
                glob,
            } => CExpr::Like {
                expr: self.boxed(expr)?,
                pattern: self.boxed(pattern)?,
                negated: *negated,
                glob: *glob,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let subject = self.expr(expr)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    let (_, item) = Self::coerce_pair(subject.clone(), self.expr(item)?);
                    items.push(item);
                }
                CExpr::InList {
                    expr: Box::new(subject),
                    list: items,
                    negated: *negated,
                }
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let subject = self.expr(expr)?;
                let (_, low) = Self::coerce_pair(subject.clone(), self.expr(low)?);
                let (_, high) = Self::coerce_pair(subject.clone(), self.expr(high)?);
                CExpr::Between {
                    expr: Box::new(subject),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated: *negated,
                }
            }
            Expr::Cast { expr, type_name } => CExpr::Cast(
                self.boxed(expr)?,
                Affinity::from_declared_type(Some(type_name)),
            ),
            Expr::Case {
                operand,
                whens,
                else_expr,
            } => CExpr::Case {
                operand: operand.as_deref().map(|e| self.boxed(e)).transpose()?,
                whens: whens
                    .iter()
                    .map(|(w, t)| Ok((self.expr(w)?, self.expr(t)?)))
                    .collect::<DbResult<_>>()?,
                else_expr: else_expr.as_deref().map(|e| self.boxed(e)).transpose()?,
            },
            Expr::Function {
                name,
                args,
                distinct,
                star,
            } => self.function(name, args, *distinct, *star)?,
        })
    }

    fn function(&mut self, name: &str, args: &[Expr], distinct: bool, star: bool) -> DbResult<CExpr> {
        if let Some(agg) = AggFunc::lookup(name, args.len(), star) {
            if !self.allow_aggregates || self.in_aggregate {
                return Err(DbError::compile(format!("misuse of aggregate function {name}()")));
            }
            self.in_aggregate = true;
            let compiled = args.iter().map(|a| self.expr(a)).collect::<DbResult<Vec<_>>>();
            self.in_aggregate = false;
            self.aggregates.push(AggSpec::new(agg, compiled?, distinct)?);
            return Ok(CExpr::Aggregate(self.aggregates.len() - 1));
        }
        if star {
            return Err(DbError::compile(format!("wrong number of arguments to function {name}()")));
        }
        if name == "matchinfo" {
            return self.matchinfo(args);
        }
        let compiled = args.iter().map(|a| self.expr(a)).collect::<DbResult<Vec<_>>>()?;
        if let Some(scalar) = Scalar::lookup(name, compiled.len())? {
            return Ok(CExpr::Scalar(scalar, compiled));
        }
        if let Some(rank) = rank_function(name) {
            if compiled.is_empty() {
                return Err(DbError::compile(format!(
                    "wrong number of arguments to function {name}()"
                )));
            }
            return Ok(CExpr::Rank(rank, compiled));
        }
        Err(DbError::compile(format!("no such function: {name}")))
    }

    fn matchinfo(&mut self, args: &[Expr]) -> DbResult<CExpr> {
        let format = match args {
            [_] => "pcx".to_string(),
            [_, Expr::Literal(Value::Text(format))] => format.clone(),
            _ => {
                return Err(DbError::compile(
                    "matchinfo() takes the table and an optional format string",
                ))
            }
        };
        match self.match_target(&args[0]) {
            Some(None) => Ok(CExpr::MatchInfo(format)),
            _ => Err(DbError::compile(
                "illegal first argument to matchinfo: expected a full-text table",
            )),
        }
    }
}

impl CExpr {
    /// Returns true if the expression reads no row data.
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Literal(_) | Self::Param(_) => true,
            Self::Column(..) | Self::Rowid | Self::Aggregate(_) | Self::MatchInfo(_) | Self::Rank(..) => false,
            Self::Coerce(e, _) | Self::Unary(_, e) | Self::IsNull(e, _) | Self::Cast(e, _) => e.is_constant(),
            Self::Binary(_, l, r) => l.is_constant() && r.is_constant(),
            Self::Like { expr, pattern, .. } => expr.is_constant() && pattern.is_constant(),
            Self::InList { expr, list, .. } => expr.is_constant() && list.iter().all(Self::is_constant),
            Self::Between { expr, low, high, .. } => {
                expr.is_constant() && low.is_constant() && high.is_constant()
            }
            Self::Case {
                operand,
                whens,
                else_expr,
            } => {
                operand.as_ref().is_none_or(|e| e.is_constant())
                    && whens.iter().all(|(w, t)| w.is_constant() && t.is_constant())
                    && else_expr.as_ref().is_none_or(|e| e.is_constant())
            }
            Self::Scalar(scalar, args) => scalar.is_deterministic() && args.iter().all(Self::is_constant),
        }
    }

    /// Evaluates the expression.
    pub fn eval(&self, ctx: &Ctx<'_>) -> DbResult<Value> {
        Ok(match self {
            Self::Literal(v) => v.clone(),
            Self::Param(i) => ctx.env.params.get(*i).cloned().unwrap_or(Value::Null),
            Self::Column(i, _) => ctx
                .row
                .and_then(|r| r.values.get(*i))
                .cloned()
                .unwrap_or(Value::Null),
            Self::Rowid => ctx.row.map_or(Value::Null, |r| Value::Integer(r.rowid)),
            Self::Coerce(e, affinity) => e.eval(ctx)?.with_affinity(*affinity),
            Self::Unary(op, e) => unary(*op, e.eval(ctx)?),
            Self::Binary(BinaryOp::And, l, r) => {
                let left = l.eval(ctx)?.truthiness();
                if left == Some(false) {
                    return Ok(bool_value(false));
                }
                match (left, r.eval(ctx)?.truthiness()) {
                    (_, Some(false)) => bool_value(false),
                    (Some(true), Some(true)) => bool_value(true),
                    _ => Value::Null,
                }
            }
            Self::Binary(BinaryOp::Or, l, r) => {
                let left = l.eval(ctx)?.truthiness();
                if left == Some(true) {
                    return Ok(bool_value(true));
                }
                match (left, r.eval(ctx)?.truthiness()) {
                    (_, Some(true)) => bool_value(true),
                    (Some(false), Some(false)) => bool_value(false),
                    _ => Value::Null,
                }
            }
            Self::Binary(op, l, r) => binary(*op, l.eval(ctx)?, r.eval(ctx)?)?,
            Self::IsNull(e, negated) => bool_value(e.eval(ctx)?.is_null() != *negated),
            Self::Like {
                expr,
                pattern,
                negated,
                glob,
            } => {
                let (subject, pattern) = (expr.eval(ctx)?, pattern.eval(ctx)?);
                match (subject.to_text(), pattern.to_text()) {
                    (Some(s), Some(p)) => {
                        let matched = if *glob {
                            func::glob_match(&p, &s)
                        } else {
                            func::like_match(&p, &s)
                        };
                        bool_value(matched != *negated)
                    }
                    _ => Value::Null,
                }
            }
            Self::InList {
                expr,
                list,
                negated,
            } => {
                let subject = expr.eval(ctx)?;
                if subject.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let candidate = item.eval(ctx)?;
                    if candidate.is_null() {
                        saw_null = true;
                    } else if subject.compare(&candidate) == Ordering::Equal {
                        return Ok(bool_value(!*negated));
                    }
                }
                if saw_null {
                    Value::Null
                } else {
                    bool_value(*negated)
                }
            }
            Self::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let subject = expr.eval(ctx)?;
                let above = binary(BinaryOp::Ge, subject.clone(), low.eval(ctx)?)?;
                let below = binary(BinaryOp::Le, subject, high.eval(ctx)?)?;
                let within = match (above.truthiness(), below.truthiness()) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                within.map_or(Value::Null, |w| bool_value(w != *negated))
            }
            Self::Cast(e, affinity) => func::cast(e.eval(ctx)?, *affinity),
            Self::Case {
                operand,
                whens,
                else_expr,
            } => {
                let subject = operand.as_ref().map(|e| e.eval(ctx)).transpose()?;
                for (when, then) in whens {
                    let candidate = when.eval(ctx)?;
                    let hit = match &subject {
                        Some(s) => {
                            !s.is_null() && !candidate.is_null() && s.compare(&candidate) == Ordering::Equal
                        }
                        None => candidate.truthiness() == Some(true),
                    };
                    if hit {
                        return then.eval(ctx);
                    }
                }
                match else_expr {
                    Some(e) => e.eval(ctx)?,
                    None => Value::Null,
                }
            }
            Self::Scalar(scalar, args) => {
                let values = args.iter().map(|a| a.eval(ctx)).collect::<DbResult<Vec<_>>>()?;
                scalar.call(&values, ctx.env)?
            }
            Self::Aggregate(i) => ctx.aggregates.get(*i).cloned().unwrap_or(Value::Null),
            Self::MatchInfo(format) => {
                let hit = ctx.row.and_then(|r| r.hit.as_ref()).ok_or_else(|| {
                    DbError::runtime("unable to use function matchinfo in the requested context")
                })?;
                Value::Blob(hit.matchinfo(format)?)
            }
            Self::Rank(function, args) => {
                let blob = match args[0].eval(ctx)? {
                    Value::Blob(b) => b,
                    _ => return Err(DbError::runtime("first argument of a rank function must be matchinfo()")),
                };
                let info = crate::fts::MatchInfo::from_blob(&blob)?;
                let mut weights = Vec::with_capacity(args.len() - 1);
                for arg in &args[1..] {
                    weights.push(arg.eval(ctx)?.as_f64().unwrap_or(0.0));
                }
                Value::Real(function.score(&info, &weights))
            }
        })
    }
}

fn unary(op: UnaryOp, v: Value) -> Value {
    match op {
        UnaryOp::Plus => v,
        UnaryOp::Neg => match v.to_numeric() {
            Value::Integer(i) => i.checked_neg().map_or(Value::Real(-(i as f64)), Value::Integer),
            Value::Real(r) => Value::Real(-r),
            _ => Value::Null,
        },
        UnaryOp::Not => v.truthiness().map_or(Value::Null, |b| bool_value(!b)),
        UnaryOp::BitNot => v.as_i64().map_or(Value::Null, |i| Value::Integer(!i)),
    }
}

fn arithmetic(op: BinaryOp, a: Value, b: Value) -> Value {
    let (a, b) = (a.to_numeric(), b.to_numeric());
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => {
            let exact = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                BinaryOp::Div => {
                    if y == 0 {
                        return Value::Null;
                    }
                    x.checked_div(y)
                }
                BinaryOp::Rem => {
                    if y == 0 {
                        return Value::Null;
                    }
                    Some(x.checked_rem(y).unwrap_or(0))
                }
                _ => None,
            };
            match exact {
                Some(v) => Value::Integer(v),
                None => real_arithmetic(op, x as f64, y as f64),
            }
        }
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (x, y) => real_arithmetic(op, x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0)),
    }
}

fn real_arithmetic(op: BinaryOp, x: f64, y: f64) -> Value {
    let r = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Value::Null;
            }
            x / y
        }
        BinaryOp::Rem => {
            let (xi, yi) = (x as i64, y as i64);
            if yi == 0 {
                return Value::Null;
            }
            return Value::Real(xi.checked_rem(yi).unwrap_or(0) as f64);
        }
        _ => return Value::Null,
    };
    if r.is_nan() {
        Value::Null
    } else {
        Value::Real(r)
    }
}

fn shift(value: i64, amount: i64, left: bool) -> i64 {
    let (amount, left) = if amount < 0 {
        (amount.unsigned_abs(), !left)
    } else {
        (amount as u64, left)
    };
    if amount >= 64 {
        return if !left && value < 0 { -1 } else { 0 };
    }
    if left {
        value << amount
    } else {
        value >> amount
    }
}

/// Applies a binary operator other than `AND`/`OR`.
pub(crate) fn binary(op: BinaryOp, a: Value, b: Value) -> DbResult<Value> {
    Ok(match op {
        BinaryOp::Is => bool_value(a.compare(&b) == Ordering::Equal && a.is_null() == b.is_null()),
        BinaryOp::IsNot => bool_value(!(a.compare(&b) == Ordering::Equal && a.is_null() == b.is_null())),
        _ if a.is_null() || b.is_null() => Value::Null,
        BinaryOp::Eq => bool_value(a.compare(&b) == Ordering::Equal),
        BinaryOp::Ne => bool_value(a.compare(&b) != Ordering::Equal),
        BinaryOp::Lt => bool_value(a.compare(&b) == Ordering::Less),
        BinaryOp::Le => bool_value(a.compare(&b) != Ordering::Greater),
        BinaryOp::Gt => bool_value(a.compare(&b) == Ordering::Greater),
        BinaryOp::Ge => bool_value(a.compare(&b) != Ordering::Less),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, a, b)
        }
        BinaryOp::Concat => {
            let mut s = a.to_text().unwrap_or_default();
            s.push_str(&b.to_text().unwrap_or_default());
            Value::Text(s)
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
            let (x, y) = (a.as_i64().unwrap_or(0), b.as_i64().unwrap_or(0));
            Value::Integer(match op {
                BinaryOp::BitAnd => x & y,
                BinaryOp::BitOr => x | y,
                BinaryOp::ShiftLeft => shift(x, y, true),
                _ => shift(x, y, false),
            })
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Match => {
            return Err(DbError::runtime(format!("operator {op:?} cannot be applied here")))
        }
    })
}
