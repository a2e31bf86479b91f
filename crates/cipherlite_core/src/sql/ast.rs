//! Syntax tree produced by the parser.

use crate::value::Value;

/// A parsed SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `CREATE TABLE`
    CreateTable(CreateTable),
    /// `CREATE VIRTUAL TABLE`
    CreateVirtualTable(CreateVirtualTable),
    /// `DROP TABLE`
    DropTable {
        /// Table name.
        name: String,
        /// `IF EXISTS` was given.
        if_exists: bool,
    },
    /// `INSERT`
    Insert(Insert),
    /// `SELECT`
    Select(Box<Select>),
    /// `UPDATE`
    Update(Update),
    /// `DELETE`
    Delete(Delete),
    /// `BEGIN`
    Begin(TransactionKind),
    /// `COMMIT` / `END`
    Commit,
    /// `ROLLBACK`
    Rollback,
    /// `PRAGMA`
    Pragma(Pragma),
}

impl Statement {
    /// Returns true if the statement only reads.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        match self {
            Self::Select(_) => true,
            Self::Pragma(p) => match p.name.as_str() {
                "wal_checkpoint" => false,
                "table_info" | "integrity_check" => true,
                _ => p.value.is_none(),
            },
            _ => false,
        }
    }
}

/// Column definition of `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type, if any.
    pub type_name: Option<String>,
    /// `PRIMARY KEY`
    pub primary_key: bool,
    /// `AUTOINCREMENT`
    pub autoincrement: bool,
    /// `NOT NULL`
    pub not_null: bool,
    /// `UNIQUE`
    pub unique: bool,
    /// `DEFAULT` expression.
    pub default: Option<Expr>,
}

/// `CREATE TABLE`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    /// Table name.
    pub name: String,
    /// `IF NOT EXISTS` was given.
    pub if_not_exists: bool,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
}

/// `CREATE VIRTUAL TABLE name USING module(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateVirtualTable {
    /// Table name.
    pub name: String,
    /// `IF NOT EXISTS` was given.
    pub if_not_exists: bool,
    /// Module name, e.g. `fts4`.
    pub module: String,
    /// Module arguments as written, trimmed, split on top-level commas.
    pub args: Vec<String>,
}

/// Conflict resolution of `INSERT OR ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conflict {
    /// Fail the statement.
    #[default]
    Abort,
    /// Replace the existing row.
    Replace,
    /// Skip the new row.
    Ignore,
}

/// Row source of `INSERT`.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// `VALUES (...), (...)`
    Values(Vec<Vec<Expr>>),
    /// `INSERT ... SELECT`
    Select(Box<Select>),
    /// `DEFAULT VALUES`
    DefaultValues,
}

/// `INSERT`
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    /// Target table.
    pub table: String,
    /// Explicit column list.
    pub columns: Option<Vec<String>>,
    /// Rows to insert.
    pub source: InsertSource,
    /// Conflict resolution.
    pub conflict: Conflict,
}

/// One entry of the result column list.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultColumn {
    /// `*`
    Star,
    /// `t.*`
    TableStar(String),
    /// `expr [AS alias]`
    Expr {
        /// Expression.
        expr: Expr,
        /// Alias.
        alias: Option<String>,
        /// Source text of the expression, used as the column name when
        /// there is no alias.
        text: String,
    },
}

/// Table in `FROM`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Table name.
    pub name: String,
    /// Alias.
    pub alias: Option<String>,
}

/// `ORDER BY` term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    /// Sort key.
    pub expr: Expr,
    /// `DESC`
    pub descending: bool,
}

/// `SELECT`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    /// `DISTINCT`
    pub distinct: bool,
    /// Result columns.
    pub columns: Vec<ResultColumn>,
    /// Single source table.
    pub from: Option<TableRef>,
    /// `WHERE`
    pub where_clause: Option<Expr>,
    /// `GROUP BY`
    pub group_by: Vec<Expr>,
    /// `HAVING`
    pub having: Option<Expr>,
    /// `ORDER BY`
    pub order_by: Vec<OrderTerm>,
    /// `LIMIT`
    pub limit: Option<Expr>,
    /// `OFFSET`
    pub offset: Option<Expr>,
}

/// `UPDATE`
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Target table.
    pub table: String,
    /// `SET col = expr` pairs.
    pub assignments: Vec<(String, Expr)>,
    /// `WHERE`
    pub where_clause: Option<Expr>,
}

/// `DELETE`
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Target table.
    pub table: String,
    /// `WHERE`
    pub where_clause: Option<Expr>,
}

/// Locking behavior of `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionKind {
    /// Locks are taken by the first statement that needs them.
    #[default]
    Deferred,
    /// Takes the write lock at once.
    Immediate,
    /// Takes the write lock at once.
    Exclusive,
}

/// `PRAGMA name [= value]`
#[derive(Debug, Clone, PartialEq)]
pub struct Pragma {
    /// Pragma name, lowercased.
    pub name: String,
    /// Assigned value as text.
    pub value: Option<String>,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `+`
    Plus,
    /// `NOT`
    Not,
    /// `~`
    BitNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `OR`
    Or,
    /// `AND`
    And,
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `IS`
    Is,
    /// `IS NOT`
    IsNot,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `MATCH`
    Match,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `<<`
    ShiftLeft,
    /// `>>`
    ShiftRight,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `||`
    Concat,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Value),
    /// Bound parameter (0-based).
    Param(usize),
    /// Column reference.
    Column {
        /// Qualifying table or alias.
        table: Option<String>,
        /// Column name.
        name: String,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `IS [NOT] NULL`
    IsNull {
        /// Operand.
        expr: Box<Expr>,
        /// `NOT` was given.
        negated: bool,
    },
    /// `[NOT] LIKE` / `[NOT] GLOB`
    Like {
        /// Subject.
        expr: Box<Expr>,
        /// Pattern.
        pattern: Box<Expr>,
        /// `NOT` was given.
        negated: bool,
        /// `GLOB` rather than `LIKE`.
        glob: bool,
    },
    /// `[NOT] IN (...)`
    InList {
        /// Subject.
        expr: Box<Expr>,
        /// Candidates.
        list: Vec<Expr>,
        /// `NOT` was given.
        negated: bool,
    },
    /// `[NOT] BETWEEN low AND high`
    Between {
        /// Subject.
        expr: Box<Expr>,
        /// Lower bound.
        low: Box<Expr>,
        /// Upper bound.
        high: Box<Expr>,
        /// `NOT` was given.
        negated: bool,
    },
    /// Function call.
    Function {
        /// Function name, lowercased.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
        /// `DISTINCT` inside the call.
        distinct: bool,
        /// `f(*)`
        star: bool,
    },
    /// `CAST(expr AS type)`
    Cast {
        /// Operand.
        expr: Box<Expr>,
        /// Target type name.
        type_name: String,
    },
    /// `CASE`
    Case {
        /// `CASE operand WHEN ...`
        operand: Option<Box<Expr>>,
        /// `WHEN cond THEN result` pairs.
        whens: Vec<(Expr, Expr)>,
        /// `ELSE`
        else_expr: Option<Box<Expr>>,
    },
}
