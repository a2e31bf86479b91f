//! Recursive-descent SQL parser.
//!
//! Operator precedence, lowest first:
//!
//! ```text
//! OR
//! AND
//! NOT
//! =  ==  !=  <>  IS  IS NOT  IN  LIKE  GLOB  MATCH  BETWEEN  ISNULL  NOTNULL
//! <  <=  >  >=
//! &  |  <<  >>
//! +  -
//! *  /  %
//! ||
//! unary -  +  ~
//! ```

use super::ast::*;
use super::lexer::{tokenize, ParamToken, Token, MAX_PARAMETER};
use crate::error::{DbError, DbResult};
use crate::value::Value;
use std::ops::Range;

/// A statement with the number of parameters it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    /// The statement.
    pub statement: Statement,
    /// Number of parameter slots.
    pub param_count: usize,
}

/// Words that end an expression or cannot serve as an implicit alias.
const RESERVED: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST", "COLLATE", "CROSS", "DEFAULT",
    "DELETE", "DESC", "DISTINCT", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS", "FROM", "GLOB",
    "GROUP", "HAVING", "IN", "INDEXED", "INNER", "INSERT", "INTERSECT", "INTO", "IS", "ISNULL",
    "JOIN", "LEFT", "LIKE", "LIMIT", "MATCH", "NATURAL", "NOT", "NOTNULL", "NULL", "OFFSET", "ON",
    "OR", "ORDER", "SELECT", "SET", "THEN", "UNION", "UPDATE", "USING", "VALUES", "WHEN", "WHERE",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// Parses one or more `;`-separated statements.
pub fn parse(sql: &str) -> DbResult<Vec<Parsed>> {
    let mut parser = Parser::new(sql)?;
    let mut out = Vec::new();
    loop {
        while parser.eat(&Token::Semicolon) {}
        if parser.at_end() {
            break;
        }
        parser.reset_params();
        let statement = parser.statement()?;
        out.push(Parsed {
            statement,
            param_count: parser.param_count,
        });
        if !parser.at_end() && !parser.eat(&Token::Semicolon) {
            return Err(parser.unexpected());
        }
    }
    Ok(out)
}

/// Parses exactly one statement.
pub fn parse_one(sql: &str) -> DbResult<Parsed> {
    let mut statements = parse(sql)?;
    match statements.len() {
        0 => Err(DbError::compile("empty statement")),
        1 => Ok(statements.remove(0)),
        _ => Err(DbError::compile("expected a single statement")),
    }
}

struct Parser<'s> {
    sql: &'s str,
    tokens: Vec<Token>,
    spans: Vec<Range<usize>>,
    pos: usize,
    param_count: usize,
    named: Vec<(String, usize)>,
}

impl<'s> Parser<'s> {
    fn new(sql: &'s str) -> DbResult<Self> {
        let (tokens, spans) = tokenize(sql)?.into_iter().unzip();
        Ok(Self {
            sql,
            tokens,
            spans,
            pos: 0,
            param_count: 0,
            named: Vec::new(),
        })
    }

    fn reset_params(&mut self) {
        self.param_count = 0;
        self.named.clear();
    }

    // ---- token helpers ----

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> DbResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    /// Source text from token `first` through the last consumed token.
    fn text_since(&self, first: usize) -> &'s str {
        let start = self.spans.get(first).map_or(0, |span| span.start);
        let end = self
            .pos
            .checked_sub(1)
            .and_then(|last| self.spans.get(last))
            .map_or(start, |span| span.end.max(start));
        self.sql.get(start..end).unwrap_or_default()
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> DbResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> DbError {
        match self.peek() {
            Some(token) => DbError::compile(format!("near {}: syntax error", describe(token))),
            None => DbError::compile("incomplete input"),
        }
    }

    fn identifier(&mut self) -> DbResult<String> {
        match self.peek() {
            Some(Token::Word(w)) if !is_reserved(w) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            Some(Token::QuotedIdent(s) | Token::String(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn if_not_exists(&mut self) -> DbResult<bool> {
        if self.eat_keyword("IF") {
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> DbResult<Statement> {
        let Some(Token::Word(word)) = self.peek() else {
            return Err(self.unexpected());
        };
        match word.to_ascii_uppercase().as_str() {
            "CREATE" => self.create(),
            "DROP" => self.drop_table(),
            "INSERT" | "REPLACE" => self.insert().map(Statement::Insert),
            "SELECT" => self.select().map(|s| Statement::Select(Box::new(s))),
            "UPDATE" => self.update().map(Statement::Update),
            "DELETE" => self.delete().map(Statement::Delete),
            "BEGIN" => self.begin(),
            "COMMIT" | "END" => {
                self.pos += 1;
                self.eat_keyword("TRANSACTION");
                Ok(Statement::Commit)
            }
            "ROLLBACK" => {
                self.pos += 1;
                self.eat_keyword("TRANSACTION");
                if self.at_keyword("TO") {
                    return Err(DbError::compile("ROLLBACK TO is not supported"));
                }
                Ok(Statement::Rollback)
            }
            "PRAGMA" => self.pragma(),
            _ => Err(self.unexpected()),
        }
    }

    fn begin(&mut self) -> DbResult<Statement> {
        self.expect_keyword("BEGIN")?;
        let kind = if self.eat_keyword("DEFERRED") {
            TransactionKind::Deferred
        } else if self.eat_keyword("IMMEDIATE") {
            TransactionKind::Immediate
        } else if self.eat_keyword("EXCLUSIVE") {
            TransactionKind::Exclusive
        } else {
            TransactionKind::Deferred
        };
        self.eat_keyword("TRANSACTION");
        Ok(Statement::Begin(kind))
    }

    fn pragma(&mut self) -> DbResult<Statement> {
        self.expect_keyword("PRAGMA")?;
        let mut name = self.identifier()?;
        if self.eat(&Token::Dot) {
            // Schema-qualified; only "main" exists.
            name = self.identifier()?;
        }
        let value = if self.eat(&Token::Eq) {
            Some(self.pragma_value()?)
        } else if self.eat(&Token::LParen) {
            let v = self.pragma_value()?;
            self.expect(&Token::RParen)?;
            Some(v)
        } else {
            None
        };
        Ok(Statement::Pragma(Pragma {
            name: name.to_ascii_lowercase(),
            value,
        }))
    }

    fn pragma_value(&mut self) -> DbResult<String> {
        let negative = if self.eat(&Token::Minus) {
            true
        } else {
            self.eat(&Token::Plus);
            false
        };
        let text = match self.advance() {
            Some(Token::Word(w) | Token::QuotedIdent(w) | Token::String(w)) => w,
            Some(Token::Integer(i)) => i.to_string(),
            Some(Token::Real(r)) => r.to_string(),
            _ => return Err(DbError::compile("bad pragma value")),
        };
        Ok(if negative { format!("-{text}") } else { text })
    }

    fn create(&mut self) -> DbResult<Statement> {
        self.expect_keyword("CREATE")?;
        if self.eat_keyword("VIRTUAL") {
            return self.create_virtual();
        }
        if !self.eat_keyword("TEMP") {
            self.eat_keyword("TEMPORARY");
        }
        if !self.at_keyword("TABLE") {
            return Err(DbError::compile(format!(
                "only CREATE TABLE and CREATE VIRTUAL TABLE are supported, near {}",
                self.peek().map_or_else(|| "end of input".to_string(), describe)
            )));
        }
        self.pos += 1;
        let if_not_exists = self.if_not_exists()?;
        let name = self.qualified_name()?;
        if self.at_keyword("AS") {
            return Err(DbError::compile("CREATE TABLE ... AS SELECT is not supported"));
        }
        self.expect(&Token::LParen)?;
        let mut columns = Vec::new();
        loop {
            if self.at_table_constraint() {
                self.table_constraint(&mut columns)?;
            } else {
                columns.push(self.column_def()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        while self.eat_keyword("WITHOUT") || self.eat_keyword("STRICT") {
            self.eat_keyword("ROWID");
            self.eat(&Token::Comma);
        }
        if columns.is_empty() {
            return Err(DbError::compile("a table needs at least one column"));
        }
        Ok(Statement::CreateTable(CreateTable {
            name,
            if_not_exists,
            columns,
        }))
    }

    fn at_table_constraint(&self) -> bool {
        ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"]
            .iter()
            .any(|kw| self.at_keyword(kw))
    }

    fn table_constraint(&mut self, columns: &mut [ColumnDef]) -> DbResult<()> {
        if self.eat_keyword("CONSTRAINT") {
            self.identifier()?;
        }
        let primary = if self.eat_keyword("PRIMARY") {
            self.expect_keyword("KEY")?;
            true
        } else if self.eat_keyword("UNIQUE") {
            false
        } else {
            return Err(DbError::compile("only PRIMARY KEY and UNIQUE table constraints are supported"));
        };
        self.expect(&Token::LParen)?;
        let name = self.identifier()?;
        self.eat_keyword("ASC");
        self.eat_keyword("DESC");
        if self.at(&Token::Comma) {
            return Err(DbError::compile("multi-column keys are not supported"));
        }
        self.expect(&Token::RParen)?;
        let column = columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&name))
            .ok_or_else(|| DbError::compile(format!("no such column: {name}")))?;
        if primary {
            column.primary_key = true;
        } else {
            column.unique = true;
        }
        Ok(())
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn column_def(&mut self) -> DbResult<ColumnDef> {
        let name = self.identifier()?;
        let mut column = ColumnDef {
            name,
            ..ColumnDef::default()
        };

        let mut type_words = Vec::new();
        while let Some(Token::Word(w)) = self.peek() {
            if is_column_constraint(w) {
                break;
            }
            type_words.push(w.clone());
            self.pos += 1;
        }
        if !type_words.is_empty() {
            let mut type_name = type_words.join(" ");
            if self.eat(&Token::LParen) {
                let mut size = Vec::new();
                while !self.eat(&Token::RParen) {
                    match self.advance() {
                        Some(Token::Integer(i)) => size.push(i.to_string()),
                        Some(Token::Comma) => {}
                        Some(Token::Plus | Token::Minus) => {}
                        _ => return Err(DbError::compile("bad type size")),
                    }
                }
                type_name = format!("{type_name}({})", size.join(","));
            }
            column.type_name = Some(type_name);
        }

        loop {
            if self.eat_keyword("CONSTRAINT") {
                self.identifier()?;
            }
            if self.eat_keyword("PRIMARY") {
                self.expect_keyword("KEY")?;
                column.primary_key = true;
                if !self.eat_keyword("ASC") {
                    self.eat_keyword("DESC");
                }
                self.conflict_clause()?;
                column.autoincrement = self.eat_keyword("AUTOINCREMENT");
            } else if self.eat_keyword("NOT") {
                self.expect_keyword("NULL")?;
                column.not_null = true;
                self.conflict_clause()?;
            } else if self.eat_keyword("NULL") {
            } else if self.eat_keyword("UNIQUE") {
                column.unique = true;
                self.conflict_clause()?;
            } else if self.eat_keyword("DEFAULT") {
                column.default = Some(self.default_value()?);
            } else if self.eat_keyword("COLLATE") {
                self.identifier()?;
            } else if self.at_keyword("CHECK") || self.at_keyword("REFERENCES") {
                return Err(DbError::compile(format!(
                    "{} constraints are not supported",
                    self.peek().map_or_else(String::new, describe)
                )));
            } else {
                break;
            }
        }
        Ok(column)
    }

    fn conflict_clause(&mut self) -> DbResult<()> {
        if self.eat_keyword("ON") {
            self.expect_keyword("CONFLICT")?;
            self.identifier()?;
        }
        Ok(())
    }

    fn default_value(&mut self) -> DbResult<Expr> {
        if self.eat(&Token::LParen) {
            let expr = self.expr()?;
            self.expect(&Token::RParen)?;
            return Ok(expr);
        }
        if self.at(&Token::Minus) || self.at(&Token::Plus) {
            return self.unary();
        }
        match self.peek() {
            Some(Token::Word(w)) if !w.eq_ignore_ascii_case("NULL") && !is_literal_word(w) => {
                let w = w.clone();
                self.pos += 1;
                Ok(Expr::Literal(Value::Text(w)))
            }
            _ => self.primary(),
        }
    }

    fn create_virtual(&mut self) -> DbResult<Statement> {
        self.expect_keyword("TABLE")?;
        let if_not_exists = self.if_not_exists()?;
        let name = self.qualified_name()?;
        self.expect_keyword("USING")?;
        let module = self.identifier()?;
        let mut args = Vec::new();
        if self.eat(&Token::LParen) {
            let mut current: Vec<Token> = Vec::new();
            let mut depth = 0usize;
            loop {
                let token = self
                    .advance()
                    .ok_or_else(|| DbError::compile("unterminated module arguments"))?;
                match token {
                    Token::RParen if depth == 0 => break,
                    Token::Comma if depth == 0 => {
                        args.push(render_arg(&current));
                        current.clear();
                        continue;
                    }
                    Token::LParen => depth += 1,
                    Token::RParen => depth -= 1,
                    _ => {}
                }
                current.push(token);
            }
            if !current.is_empty() || !args.is_empty() {
                args.push(render_arg(&current));
            }
        }
        Ok(Statement::CreateVirtualTable(CreateVirtualTable {
            name,
            if_not_exists,
            module: module.to_ascii_lowercase(),
            args,
        }))
    }

    fn drop_table(&mut self) -> DbResult<Statement> {
        self.expect_keyword("DROP")?;
        self.expect_keyword("TABLE")?;
        let if_exists = if self.eat_keyword("IF") {
            self.expect_keyword("EXISTS")?;
            true
        } else {
            false
        };
        let name = self.qualified_name()?;
        Ok(Statement::DropTable { name, if_exists })
    }

    fn qualified_name(&mut self) -> DbResult<String> {
        let first = self.identifier()?;
        if self.eat(&Token::Dot) {
            if !first.eq_ignore_ascii_case("main") {
                return Err(DbError::compile(format!("unknown database {first}")));
            }
            return self.identifier();
        }
        Ok(first)
    }

    fn or_conflict(&mut self) -> DbResult<Conflict> {
        if !self.eat_keyword("OR") {
            return Ok(Conflict::Abort);
        }
        let word = self.identifier()?;
        match word.to_ascii_uppercase().as_str() {
            "REPLACE" => Ok(Conflict::Replace),
            "IGNORE" => Ok(Conflict::Ignore),
            "ABORT" | "FAIL" | "ROLLBACK" => Ok(Conflict::Abort),
            other => Err(DbError::compile(format!("unknown conflict resolution {other}"))),
        }
    }

    fn insert(&mut self) -> DbResult<Insert> {
        let conflict = if self.eat_keyword("REPLACE") {
            Conflict::Replace
        } else {
            self.expect_keyword("INSERT")?;
            self.or_conflict()?
        };
        self.expect_keyword("INTO")?;
        let table = self.qualified_name()?;
        if self.eat_keyword("AS") {
            self.identifier()?;
        }
        let columns = if self.eat(&Token::LParen) {
            let mut cols = vec![self.identifier()?];
            while self.eat(&Token::Comma) {
                cols.push(self.identifier()?);
            }
            self.expect(&Token::RParen)?;
            Some(cols)
        } else {
            None
        };
        let source = if self.eat_keyword("VALUES") {
            let mut rows = Vec::new();
            loop {
                self.expect(&Token::LParen)?;
                rows.push(self.expr_list()?);
                self.expect(&Token::RParen)?;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if self.at_keyword("SELECT") {
            InsertSource::Select(Box::new(self.select()?))
        } else if self.eat_keyword("DEFAULT") {
            self.expect_keyword("VALUES")?;
            InsertSource::DefaultValues
        } else {
            return Err(self.unexpected());
        };
        Ok(Insert {
            table,
            columns,
            source,
            conflict,
        })
    }

    fn update(&mut self) -> DbResult<Update> {
        self.expect_keyword("UPDATE")?;
        self.or_conflict()?;
        let table = self.qualified_name()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect(&Token::Eq)?;
            assignments.push((column, self.expr()?));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let where_clause = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Update {
            table,
            assignments,
            where_clause,
        })
    }

    fn delete(&mut self) -> DbResult<Delete> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.qualified_name()?;
        let where_clause = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Delete {
            table,
            where_clause,
        })
    }

    fn select(&mut self) -> DbResult<Select> {
        self.expect_keyword("SELECT")?;
        let mut select = Select {
            distinct: self.eat_keyword("DISTINCT"),
            ..Select::default()
        };
        if !select.distinct {
            self.eat_keyword("ALL");
        }

        loop {
            select.columns.push(self.result_column()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        if self.eat_keyword("FROM") {
            let name = self.qualified_name()?;
            let alias = if self.eat_keyword("AS") {
                Some(self.identifier()?)
            } else {
                self.implicit_alias()
            };
            select.from = Some(TableRef { name, alias });
            if self.at(&Token::Comma) || self.at_keyword("JOIN") || self.at_keyword("INNER")
                || self.at_keyword("LEFT") || self.at_keyword("CROSS") || self.at_keyword("NATURAL")
            {
                return Err(DbError::compile("joins are not supported"));
            }
        }
        if self.eat_keyword("WHERE") {
            select.where_clause = Some(self.expr()?);
        }
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            select.group_by = self.expr_list()?;
        }
        if self.eat_keyword("HAVING") {
            select.having = Some(self.expr()?);
        }
        if ["UNION", "INTERSECT", "EXCEPT"].iter().any(|kw| self.at_keyword(kw)) {
            return Err(DbError::compile("compound SELECT is not supported"));
        }
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.expr()?;
                if self.eat_keyword("COLLATE") {
                    self.identifier()?;
                }
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                select.order_by.push(OrderTerm { expr, descending });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        if self.eat_keyword("LIMIT") {
            let first = self.expr()?;
            if self.eat_keyword("OFFSET") {
                select.limit = Some(first);
                select.offset = Some(self.expr()?);
            } else if self.eat(&Token::Comma) {
                select.offset = Some(first);
                select.limit = Some(self.expr()?);
            } else {
                select.limit = Some(first);
            }
        }
        Ok(select)
    }

    fn implicit_alias(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::Word(w)) if !is_reserved(w) => {
                let w = w.clone();
                self.pos += 1;
                Some(w)
            }
            Some(Token::QuotedIdent(s)) => {
                let s = s.clone();
                self.pos += 1;
                Some(s)
            }
            _ => None,
        }
    }

    fn result_column(&mut self) -> DbResult<ResultColumn> {
        if self.eat(&Token::Star) {
            return Ok(ResultColumn::Star);
        }
        if let (Some(Token::Word(t) | Token::QuotedIdent(t)), Some(Token::Dot), Some(Token::Star)) =
            (self.peek(), self.peek_at(1), self.peek_at(2))
        {
            let table = t.clone();
            self.pos += 3;
            return Ok(ResultColumn::TableStar(table));
        }
        let first = self.pos;
        let expr = self.expr()?;
        let text = self.text_since(first).to_string();
        let alias = if self.eat_keyword("AS") {
            Some(self.identifier()?)
        } else {
            match self.peek() {
                Some(Token::String(s)) => {
                    let s = s.clone();
                    self.pos += 1;
                    Some(s)
                }
                _ => self.implicit_alias(),
            }
        };
        Ok(ResultColumn::Expr { expr, alias, text })
    }

    // ---- expressions ----

    fn expr_list(&mut self) -> DbResult<Vec<Expr>> {
        let mut list = vec![self.expr()?];
        while self.eat(&Token::Comma) {
            list.push(self.expr()?);
        }
        Ok(list)
    }

    fn expr(&mut self) -> DbResult<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> DbResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> DbResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> DbResult<Expr> {
        if self.eat_keyword("NOT") {
            let expr = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.equality()
    }

    fn equality(&mut self) -> DbResult<Expr> {
        let mut left = self.comparison()?;
        loop {
            if self.eat(&Token::Eq) {
                left = binary(BinaryOp::Eq, left, self.comparison()?);
            } else if self.eat(&Token::Ne) {
                left = binary(BinaryOp::Ne, left, self.comparison()?);
            } else if self.eat_keyword("IS") {
                let negated = self.eat_keyword("NOT");
                if self.eat_keyword("NULL") {
                    left = Expr::IsNull {
                        expr: Box::new(left),
                        negated,
                    };
                } else {
                    let op = if negated { BinaryOp::IsNot } else { BinaryOp::Is };
                    left = binary(op, left, self.comparison()?);
                }
            } else if self.eat_keyword("ISNULL") {
                left = Expr::IsNull {
                    expr: Box::new(left),
                    negated: false,
                };
            } else if self.eat_keyword("NOTNULL") {
                left = Expr::IsNull {
                    expr: Box::new(left),
                    negated: true,
                };
            } else if self.at_keyword("NOT")
                && self.peek_at(1).is_some_and(|t| t.is_keyword("NULL"))
            {
                self.pos += 2;
                left = Expr::IsNull {
                    expr: Box::new(left),
                    negated: true,
                };
            } else {
                let negated = self.at_keyword("NOT")
                    && self.peek_at(1).is_some_and(|t| {
                        ["IN", "LIKE", "GLOB", "MATCH", "BETWEEN"]
                            .iter()
                            .any(|kw| t.is_keyword(kw))
                    });
                if negated {
                    self.pos += 1;
                }
                if self.eat_keyword("IN") {
                    self.expect(&Token::LParen)?;
                    let list = if self.at(&Token::RParen) {
                        Vec::new()
                    } else if self.at_keyword("SELECT") {
                        return Err(DbError::compile("subqueries are not supported"));
                    } else {
                        self.expr_list()?
                    };
                    self.expect(&Token::RParen)?;
                    left = Expr::InList {
                        expr: Box::new(left),
                        list,
                        negated,
                    };
                } else if self.at_keyword("LIKE") || self.at_keyword("GLOB") {
                    let glob = self.at_keyword("GLOB");
                    self.pos += 1;
                    let pattern = self.comparison()?;
                    if self.at_keyword("ESCAPE") {
                        return Err(DbError::compile("LIKE ... ESCAPE is not supported"));
                    }
                    left = Expr::Like {
                        expr: Box::new(left),
                        pattern: Box::new(pattern),
                        negated,
                        glob,
                    };
                } else if self.eat_keyword("MATCH") {
                    let matched = binary(BinaryOp::Match, left, self.comparison()?);
                    left = if negated {
                        Expr::Unary {
                            op: UnaryOp::Not,
                            expr: Box::new(matched),
                        }
                    } else {
                        matched
                    };
                } else if self.eat_keyword("BETWEEN") {
                    let low = self.comparison()?;
                    self.expect_keyword("AND")?;
                    let high = self.comparison()?;
                    left = Expr::Between {
                        expr: Box::new(left),
                        low: Box::new(low),
                        high: Box::new(high),
                        negated,
                    };
                } else {
                    return Ok(left);
                }
            }
        }
    }

    fn comparison(&mut self) -> DbResult<Expr> {
        let mut left = self.bitwise()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = binary(op, left, self.bitwise()?);
        }
    }

    fn bitwise(&mut self) -> DbResult<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::BitAnd) => BinaryOp::BitAnd,
                Some(Token::BitOr) => BinaryOp::BitOr,
                Some(Token::ShiftLeft) => BinaryOp::ShiftLeft,
                Some(Token::ShiftRight) => BinaryOp::ShiftRight,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = binary(op, left, self.additive()?);
        }
    }

    fn additive(&mut self) -> DbResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = binary(op, left, self.multiplicative()?);
        }
    }

    fn multiplicative(&mut self) -> DbResult<Expr> {
        let mut left = self.concat()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = binary(op, left, self.concat()?);
        }
    }

    fn concat(&mut self) -> DbResult<Expr> {
        let mut left = self.unary()?;
        while self.eat(&Token::Concat) {
            left = binary(BinaryOp::Concat, left, self.unary()?);
        }
        Ok(left)
    }

    fn unary(&mut self) -> DbResult<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            _ => None,
        };
        let Some(op) = op else {
            let expr = self.primary()?;
            if self.eat_keyword("COLLATE") {
                self.identifier()?;
            }
            return Ok(expr);
        };
        self.pos += 1;
        if op == UnaryOp::Neg && self.at_integer_text("9223372036854775808") {
            self.pos += 1;
            return Ok(Expr::Literal(Value::Integer(i64::MIN)));
        }
        let operand = self.unary()?;
        Ok(match (op, operand) {
            (UnaryOp::Neg, Expr::Literal(Value::Integer(i))) => Expr::Literal(
                i.checked_neg()
                    .map_or(Value::Real(-(i as f64)), Value::Integer),
            ),
            (UnaryOp::Neg, Expr::Literal(Value::Real(r))) => Expr::Literal(Value::Real(-r)),
            (UnaryOp::Plus, e @ Expr::Literal(Value::Integer(_) | Value::Real(_))) => e,
            (op, operand) => Expr::Unary {
                op,
                expr: Box::new(operand),
            },
        })
    }

    /// True when the next token is a number literal spelled exactly `digits`.
    fn at_integer_text(&self, digits: &str) -> bool {
        matches!(self.peek(), Some(Token::Real(_)))
            && self
                .spans
                .get(self.pos)
                .and_then(|span| self.sql.get(span.clone()))
                == Some(digits)
    }

    fn param(&mut self, token: ParamToken) -> DbResult<Expr> {
        let index = match token {
            ParamToken::Next => {
                self.param_count += 1;
                self.param_count - 1
            }
            ParamToken::Numbered(n) => {
                self.param_count = self.param_count.max(n);
                n - 1
            }
            ParamToken::Named(name) => {
                if let Some((_, index)) = self.named.iter().find(|(n, _)| *n == name) {
                    *index
                } else {
                    self.param_count += 1;
                    let index = self.param_count - 1;
                    self.named.push((name, index));
                    index
                }
            }
        };
        if self.param_count > MAX_PARAMETER {
            return Err(DbError::compile(format!("too many parameters (limit {MAX_PARAMETER})")));
        }
        Ok(Expr::Param(index))
    }

    fn primary(&mut self) -> DbResult<Expr> {
        let Some(token) = self.advance() else {
            return Err(DbError::compile("incomplete input"));
        };
        match token {
            Token::Integer(i) => Ok(Expr::Literal(Value::Integer(i))),
            Token::Real(r) => Ok(Expr::Literal(Value::Real(r))),
            Token::String(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Blob(b) => Ok(Expr::Literal(Value::Blob(b))),
            Token::Param(p) => self.param(p),
            Token::LParen => {
                if self.at_keyword("SELECT") {
                    return Err(DbError::compile("subqueries are not supported"));
                }
                let expr = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::QuotedIdent(name) => self.column_ref(name),
            Token::Word(word) => {
                let upper = word.to_ascii_uppercase();
                match upper.as_str() {
                    "NULL" => Ok(Expr::Literal(Value::Null)),
                    "TRUE" => Ok(Expr::Literal(Value::Integer(1))),
                    "FALSE" => Ok(Expr::Literal(Value::Integer(0))),
                    "CAST" => self.cast(),
                    "CASE" => self.case(),
                    "EXISTS" => Err(DbError::compile("subqueries are not supported")),
                    _ if self.at(&Token::LParen) => self.function(upper.to_ascii_lowercase()),
                    _ if is_reserved(&word) => {
                        self.pos -= 1;
                        Err(self.unexpected())
                    }
                    _ => self.column_ref(word),
                }
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn column_ref(&mut self, first: String) -> DbResult<Expr> {
        if self.eat(&Token::Dot) {
            let name = self.identifier()?;
            return Ok(Expr::Column {
                table: Some(first),
                name,
            });
        }
        Ok(Expr::Column {
            table: None,
            name: first,
        })
    }

    fn function(&mut self, name: String) -> DbResult<Expr> {
        self.expect(&Token::LParen)?;
        if self.eat(&Token::Star) {
            self.expect(&Token::RParen)?;
            return Ok(Expr::Function {
                name,
                args: Vec::new(),
                distinct: false,
                star: true,
            });
        }
        let distinct = self.eat_keyword("DISTINCT");
        let args = if self.at(&Token::RParen) {
            Vec::new()
        } else {
            self.expr_list()?
        };
        self.expect(&Token::RParen)?;
        Ok(Expr::Function {
            name,
            args,
            distinct,
            star: false,
        })
    }

    fn cast(&mut self) -> DbResult<Expr> {
        self.expect(&Token::LParen)?;
        let expr = self.expr()?;
        self.expect_keyword("AS")?;
        let mut words = Vec::new();
        while let Some(Token::Word(w)) = self.peek() {
            words.push(w.clone());
            self.pos += 1;
        }
        if words.is_empty() {
            return Err(self.unexpected());
        }
        if self.eat(&Token::LParen) {
            while !self.eat(&Token::RParen) {
                if self.advance().is_none() {
                    return Err(DbError::compile("incomplete input"));
                }
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            type_name: words.join(" "),
        })
    }

    fn case(&mut self) -> DbResult<Expr> {
        let operand = if self.at_keyword("WHEN") {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let mut whens = Vec::new();
        while self.eat_keyword("WHEN") {
            let when = self.expr()?;
            self.expect_keyword("THEN")?;
            whens.push((when, self.expr()?));
        }
        if whens.is_empty() {
            return Err(self.unexpected());
        }
        let else_expr = if self.eat_keyword("ELSE") {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect_keyword("END")?;
        Ok(Expr::Case {
            operand,
            whens,
            else_expr,
        })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_column_constraint(word: &str) -> bool {
    [
        "CONSTRAINT", "PRIMARY", "NOT", "NULL", "UNIQUE", "DEFAULT", "COLLATE", "CHECK",
        "REFERENCES", "GENERATED", "AS",
    ]
    .iter()
    .any(|kw| kw.eq_ignore_ascii_case(word))
}

fn is_literal_word(word: &str) -> bool {
    ["TRUE", "FALSE"].iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("\"{w}\""),
        Token::QuotedIdent(s) => format!("\"{s}\""),
        Token::String(s) => format!("'{s}'"),
        Token::Integer(i) => format!("\"{i}\""),
        Token::Real(r) => format!("\"{r}\""),
        other => format!("\"{}\"", symbol(other)),
    }
}

fn symbol(token: &Token) -> String {
    match token {
        Token::Word(w) | Token::QuotedIdent(w) | Token::String(w) => w.clone(),
        Token::Integer(i) => i.to_string(),
        Token::Real(r) => r.to_string(),
        Token::Blob(_) => "X''".into(),
        Token::Param(ParamToken::Next) => "?".into(),
        Token::Param(ParamToken::Numbered(n)) => format!("?{n}"),
        Token::Param(ParamToken::Named(n)) => n.clone(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::Comma => ",".into(),
        Token::Semicolon => ";".into(),
        Token::Dot => ".".into(),
        Token::Star => "*".into(),
        Token::Plus => "+".into(),
        Token::Minus => "-".into(),
        Token::Slash => "/".into(),
        Token::Percent => "%".into(),
        Token::Concat => "||".into(),
        Token::Eq => "=".into(),
        Token::Ne => "!=".into(),
        Token::Lt => "<".into(),
        Token::Le => "<=".into(),
        Token::Gt => ">".into(),
        Token::Ge => ">=".into(),
        Token::BitAnd => "&".into(),
        Token::BitOr => "|".into(),
        Token::Tilde => "~".into(),
        Token::ShiftLeft => "<<".into(),
        Token::ShiftRight => ">>".into(),
    }
}

/// Renders module argument tokens back to text; `=` binds without spaces.
fn render_arg(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut glue = true;
    for token in tokens {
        let is_eq = *token == Token::Eq;
        if !out.is_empty() && !glue && !is_eq {
            out.push(' ');
        }
        out.push_str(&symbol(token));
        glue = is_eq;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(sql: &str) -> Statement {
        parse_one(sql).unwrap().statement
    }

    fn col(name: &str) -> Expr {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    #[test]
    fn create_table_with_constraints() {
        let Statement::CreateTable(t) = one(
            "CREATE TABLE IF NOT EXISTS people (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             name VARCHAR(20) NOT NULL DEFAULT 'x', score DOUBLE PRECISION, UNIQUE(name))",
        ) else {
            panic!("not a create table");
        };
        assert!(t.if_not_exists);
        assert_eq!(t.columns.len(), 3);
        assert!(t.columns[0].primary_key && t.columns[0].autoincrement);
        assert_eq!(t.columns[1].type_name.as_deref(), Some("VARCHAR(20)"));
        assert!(t.columns[1].not_null && t.columns[1].unique);
        assert_eq!(t.columns[1].default, Some(Expr::Literal(Value::Text("x".into()))));
        assert_eq!(t.columns[2].type_name.as_deref(), Some("DOUBLE PRECISION"));
    }

    #[test]
    fn virtual_table_arguments_keep_tokenizer_options() {
        let Statement::CreateVirtualTable(v) =
            one("CREATE VIRTUAL TABLE v1 USING fts4(name, tokenize=HTMLTokenizer stemmer=english)")
        else {
            panic!("not a virtual table");
        };
        assert_eq!(v.module, "fts4");
        assert_eq!(v.args, vec!["name", "tokenize=HTMLTokenizer stemmer=english"]);
    }

    #[test]
    fn insert_forms() {
        let Statement::Insert(i) = one("INSERT INTO t1 VALUES ('one'), ('two'), ('three')") else {
            panic!("not an insert");
        };
        match i.source {
            InsertSource::Values(rows) => assert_eq!(rows.len(), 3),
            other => panic!("unexpected source {other:?}"),
        }
        let Statement::Insert(i) = one("INSERT OR REPLACE INTO t(a, b) SELECT x, y FROM u") else {
            panic!("not an insert");
        };
        assert_eq!(i.conflict, Conflict::Replace);
        assert_eq!(i.columns, Some(vec!["a".into(), "b".into()]));
        assert!(matches!(i.source, InsertSource::Select(_)));
    }

    #[test]
    fn select_clauses() {
        let Statement::Select(s) = one(
            "SELECT DISTINCT x AS a, count(*) FROM t1 AS q WHERE x > 1 \
             GROUP BY x HAVING count(*) > 1 ORDER BY a DESC, 2 LIMIT 10 OFFSET 5",
        ) else {
            panic!("not a select");
        };
        assert!(s.distinct);
        assert_eq!(s.columns.len(), 2);
        assert_eq!(s.from.as_ref().unwrap().alias.as_deref(), Some("q"));
        assert!(s.where_clause.is_some());
        assert_eq!(s.group_by.len(), 1);
        assert!(s.having.is_some());
        assert_eq!(s.order_by.len(), 2);
        assert!(s.order_by[0].descending);
        assert_eq!(s.limit, Some(Expr::Literal(Value::Integer(10))));
        assert_eq!(s.offset, Some(Expr::Literal(Value::Integer(5))));
    }

    #[test]
    fn limit_comma_form_swaps_offset() {
        let Statement::Select(s) = one("SELECT * FROM t LIMIT 2, 3") else {
            panic!("not a select");
        };
        assert_eq!(s.offset, Some(Expr::Literal(Value::Integer(2))));
        assert_eq!(s.limit, Some(Expr::Literal(Value::Integer(3))));
    }

    #[test]
    fn precedence() {
        let Statement::Select(s) = one("SELECT 1 + 2 * 3 || 'x', a OR b AND NOT c") else {
            panic!("not a select");
        };
        let ResultColumn::Expr { expr, .. } = &s.columns[0] else {
            panic!()
        };
        // || binds tighter than *, which binds tighter than +.
        assert_eq!(
            *expr,
            binary(
                BinaryOp::Add,
                Expr::Literal(Value::Integer(1)),
                binary(
                    BinaryOp::Mul,
                    Expr::Literal(Value::Integer(2)),
                    binary(
                        BinaryOp::Concat,
                        Expr::Literal(Value::Integer(3)),
                        Expr::Literal(Value::Text("x".into()))
                    )
                )
            )
        );
        let ResultColumn::Expr { expr, .. } = &s.columns[1] else {
            panic!()
        };
        assert_eq!(
            *expr,
            binary(
                BinaryOp::Or,
                col("a"),
                binary(
                    BinaryOp::And,
                    col("b"),
                    Expr::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(col("c"))
                    }
                )
            )
        );
    }

    #[test]
    fn postfix_predicates() {
        let Statement::Select(s) = one(
            "SELECT * FROM t WHERE a IS NOT NULL AND b NOT IN (1, 2) AND c BETWEEN 1 AND 5 \
             AND d NOT LIKE 'x%' AND t MATCH ?",
        ) else {
            panic!("not a select");
        };
        fn conjuncts<'a>(e: &'a Expr, out: &mut Vec<&'a Expr>) {
            match e {
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
        let where_clause = s.where_clause.unwrap();
        let mut terms = Vec::new();
        conjuncts(&where_clause, &mut terms);
        let kinds: Vec<_> = terms
            .iter()
            .map(|e| match e {
                Expr::IsNull { negated: true, .. } => "notnull",
                Expr::InList { negated: true, .. } => "notin",
                Expr::Between { negated: false, .. } => "between",
                Expr::Like { negated: true, .. } => "notlike",
                Expr::Binary {
                    op: BinaryOp::Match,
                    ..
                } => "match",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["notnull", "notin", "between", "notlike", "match"]);
    }

    #[test]
    fn smallest_integer_literal_stays_an_integer() {
        let sql = "SELECT -9223372036854775808, - -9223372036854775808, 9223372036854775808";
        let Statement::Select(s) = one(sql) else {
            panic!("not a select");
        };
        let values: Vec<_> = s
            .columns
            .iter()
            .map(|c| match c {
                ResultColumn::Expr {
                    expr: Expr::Literal(v),
                    ..
                } => v.clone(),
                _ => Value::Null,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                Value::Integer(i64::MIN),
                Value::Real(9_223_372_036_854_775_808.0),
                Value::Real(9_223_372_036_854_775_808.0),
            ]
        );
    }

    #[test]
    fn parameters_are_numbered() {
        let parsed = parse_one("SELECT ?, ?5, :a, ?, :a").unwrap();
        assert_eq!(parsed.param_count, 7);
        let Statement::Select(s) = parsed.statement else {
            panic!()
        };
        let indexes: Vec<_> = s
            .columns
            .iter()
            .map(|c| match c {
                ResultColumn::Expr {
                    expr: Expr::Param(i),
                    ..
                } => *i,
                _ => usize::MAX,
            })
            .collect();
        assert_eq!(indexes, vec![0, 4, 5, 6, 5]);
    }

    #[test]
    fn transactions_and_pragmas() {
        assert_eq!(one("BEGIN IMMEDIATE TRANSACTION"), Statement::Begin(TransactionKind::Immediate));
        assert_eq!(one("END"), Statement::Commit);
        assert_eq!(one("ROLLBACK"), Statement::Rollback);
        assert_eq!(
            one("PRAGMA journal_mode = WAL"),
            Statement::Pragma(Pragma {
                name: "journal_mode".into(),
                value: Some("WAL".into())
            })
        );
        assert_eq!(
            one("PRAGMA user_version = -3"),
            Statement::Pragma(Pragma {
                name: "user_version".into(),
                value: Some("-3".into())
            })
        );
    }

    #[test]
    fn multiple_statements() {
        let all = parse("CREATE TABLE t(x); INSERT INTO t VALUES (1);; SELECT * FROM t").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn syntax_errors_name_the_token() {
        let err = parse_one("SELEC 1").unwrap_err();
        assert!(err.to_string().contains("SELEC"));
        assert!(parse_one("SELECT * FROM a, b").is_err());
        assert!(parse_one("SELECT (1").is_err());
        assert!(parse_one("").is_err());
    }
}
