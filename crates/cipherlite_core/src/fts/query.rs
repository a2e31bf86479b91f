//! Full-text query syntax.
//!
//! ```text
//! query   := or
//! or      := and ("OR" and)*
//! and     := not (["AND"] not)*
//! not     := primary ("NOT" primary)*
//! primary := "(" or ")" | [column ":"] (word | word "*" | '"' text '"')
//! ```
//!
//! Operators are recognized only in upper case. Words and phrases run
//! through the table's tokenizer, so stemming applies to queries exactly as
//! it does to documents. A word the tokenizer reduces to nothing is dropped
//! together with the operator that joins it.

use super::tokenizer::Tokenizer;
use crate::error::{DbError, DbResult};

/// One term of a phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    /// Normalized term.
    pub term: String,
    /// Matches any term starting with `term`.
    pub prefix: bool,
}

/// Consecutive terms that must appear at consecutive positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    /// Column restriction.
    pub column: Option<usize>,
    /// Terms in order.
    pub terms: Vec<QueryTerm>,
}

/// Parsed query. Phrases are numbered in the order they appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpr {
    /// Index into [`Query::phrases`].
    Phrase(usize),
    /// Both sides match.
    And(Box<QueryExpr>, Box<QueryExpr>),
    /// Either side matches.
    Or(Box<QueryExpr>, Box<QueryExpr>),
    /// Left side matches and right side does not.
    Not(Box<QueryExpr>, Box<QueryExpr>),
}

/// A parsed full-text query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// All phrases, in order of appearance.
    pub phrases: Vec<Phrase>,
    /// Boolean structure; `None` when every phrase was empty.
    pub expr: Option<QueryExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexeme {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Column(String),
    Word(String),
    Quoted(String),
}

fn lex(query: &str, columns: &[String]) -> Vec<Lexeme> {
    let mut out = Vec::new();
    let mut chars = query.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                out.push(Lexeme::LParen);
            }
            ')' => {
                chars.next();
                out.push(Lexeme::RParen);
            }
            '"' => {
                chars.next();
                let mut end = query.len();
                for (i, c) in chars.by_ref() {
                    if c == '"' {
                        end = i;
                        break;
                    }
                }
                let mut text = query[start + 1..end].to_string();
                if chars.peek().is_some_and(|(_, c)| *c == '*') {
                    chars.next();
                    text.push('*');
                }
                out.push(Lexeme::Quoted(text));
            }
            _ => {
                let mut end = query.len();
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                let word = &query[start..end];
                match word {
                    "AND" => out.push(Lexeme::And),
                    "OR" => out.push(Lexeme::Or),
                    "NOT" => out.push(Lexeme::Not),
                    _ => match word.split_once(':') {
                        Some((column, rest))
                            if columns.iter().any(|c| c.eq_ignore_ascii_case(column)) =>
                        {
                            out.push(Lexeme::Column(column.to_string()));
                            if !rest.is_empty() {
                                out.push(Lexeme::Word(rest.to_string()));
                            }
                        }
                        _ => out.push(Lexeme::Word(word.to_string())),
                    },
                }
            }
        }
    }
    out
}

struct Parser<'a> {
    lexemes: Vec<Lexeme>,
    pos: usize,
    columns: &'a [String],
    default_column: Option<usize>,
    tokenizer: &'a dyn Tokenizer,
    phrases: Vec<Phrase>,
    depth: usize,
}

/// Parses `text` against a table with `columns`. `default_column` restricts
/// phrases without an explicit `column:` filter.
pub fn parse_query(
    text: &str,
    columns: &[String],
    default_column: Option<usize>,
    tokenizer: &dyn Tokenizer,
) -> DbResult<Query> {
    let mut parser = Parser {
        lexemes: lex(text, columns),
        pos: 0,
        columns,
        default_column,
        tokenizer,
        phrases: Vec::new(),
        depth: 0,
    };
    let expr = parser.or()?;
    if parser.pos < parser.lexemes.len() {
        return Err(DbError::runtime(format!(
            "malformed MATCH expression: [{text}]"
        )));
    }
    Ok(Query {
        phrases: parser.phrases,
        expr,
    })
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn or(&mut self) -> DbResult<Option<QueryExpr>> {
        let mut left = self.and()?;
        while self.peek() == Some(&Lexeme::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = match (left, right) {
                (Some(l), Some(r)) => Some(QueryExpr::Or(Box::new(l), Box::new(r))),
                (l, r) => l.or(r),
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> DbResult<Option<QueryExpr>> {
        let mut left = self.not()?;
        loop {
            match self.peek() {
                Some(Lexeme::And) => self.pos += 1,
                Some(Lexeme::LParen | Lexeme::Column(_) | Lexeme::Word(_) | Lexeme::Quoted(_)) => {}
                _ => break,
            }
            let right = self.not()?;
            left = match (left, right) {
                (Some(l), Some(r)) => Some(QueryExpr::And(Box::new(l), Box::new(r))),
                (l, r) => l.or(r),
            };
        }
        Ok(left)
    }

    fn not(&mut self) -> DbResult<Option<QueryExpr>> {
        let mut left = self.primary()?;
        while self.peek() == Some(&Lexeme::Not) {
            self.pos += 1;
            let right = self.primary()?;
            left = match (left, right) {
                (Some(l), Some(r)) => Some(QueryExpr::Not(Box::new(l), Box::new(r))),
                (l, None) => l,
                (None, Some(_)) => None,
            };
        }
        Ok(left)
    }

    fn primary(&mut self) -> DbResult<Option<QueryExpr>> {
        let mut column = self.default_column;
        if let Some(Lexeme::Column(name)) = self.peek() {
            column = self.columns.iter().position(|c| c.eq_ignore_ascii_case(name));
            self.pos += 1;
        }
        let lexeme = self
            .lexemes
            .get(self.pos)
            .cloned()
            .ok_or_else(|| DbError::runtime("malformed MATCH expression: unexpected end"))?;
        self.pos += 1;
        match lexeme {
            Lexeme::LParen => {
                self.depth += 1;
                if self.depth > 64 {
                    return Err(DbError::runtime("MATCH expression nested too deeply"));
                }
                let inner = self.or()?;
                if self.peek() != Some(&Lexeme::RParen) {
                    return Err(DbError::runtime("malformed MATCH expression: missing )"));
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(inner)
            }
            Lexeme::Word(text) | Lexeme::Quoted(text) => Ok(self.phrase(&text, column)),
            other => Err(DbError::runtime(format!(
                "malformed MATCH expression near {other:?}"
            ))),
        }
    }

    fn phrase(&mut self, text: &str, column: Option<usize>) -> Option<QueryExpr> {
        let (body, prefix) = match text.strip_suffix('*') {
            Some(body) => (body, true),
            None => (text, false),
        };
        let mut terms: Vec<QueryTerm> = self
            .tokenizer
            .tokenize(body)
            .into_iter()
            .map(|t| QueryTerm {
                term: t.term,
                prefix: false,
            })
            .collect();
        let last = terms.last_mut()?;
        last.prefix = prefix;
        self.phrases.push(Phrase { column, terms });
        Some(QueryExpr::Phrase(self.phrases.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fts::stemmer::Language;
    use crate::fts::tokenizer::{BuiltinTokenizer, TokenizerKind};

    fn parse(text: &str) -> Query {
        let tokenizer = BuiltinTokenizer::new(TokenizerKind::Simple, None);
        let columns = vec!["title".to_string(), "body".to_string()];
        parse_query(text, &columns, None, &tokenizer).unwrap()
    }

    fn phrase(i: usize) -> Box<QueryExpr> {
        Box::new(QueryExpr::Phrase(i))
    }

    #[test]
    fn implicit_and_binds_tighter_than_or() {
        let q = parse("a b OR c");
        assert_eq!(
            q.expr,
            Some(QueryExpr::Or(
                Box::new(QueryExpr::And(phrase(0), phrase(1))),
                phrase(2)
            ))
        );
    }

    #[test]
    fn not_binds_tighter_than_and() {
        let q = parse("a AND b NOT c");
        assert_eq!(
            q.expr,
            Some(QueryExpr::And(
                phrase(0),
                Box::new(QueryExpr::Not(phrase(1), phrase(2)))
            ))
        );
    }

    #[test]
    fn phrases_prefixes_and_columns() {
        let q = parse("title:\"Hello World\" bod*");
        assert_eq!(q.phrases[0].column, Some(0));
        assert_eq!(q.phrases[0].terms.len(), 2);
        assert_eq!(q.phrases[1].terms[0].term, "bod");
        assert!(q.phrases[1].terms[0].prefix);
        assert_eq!(q.phrases[1].column, None);
    }

    #[test]
    fn lowercase_operators_are_terms() {
        let q = parse("cats or dogs");
        assert_eq!(q.phrases.len(), 3);
        assert_eq!(q.phrases[1].terms[0].term, "or");
    }

    #[test]
    fn parentheses_group() {
        let q = parse("(a OR b) c");
        assert_eq!(
            q.expr,
            Some(QueryExpr::And(
                Box::new(QueryExpr::Or(phrase(0), phrase(1))),
                phrase(2)
            ))
        );
        let tokenizer = BuiltinTokenizer::new(TokenizerKind::Simple, None);
        assert!(parse_query("(a OR b", &[], None, &tokenizer).is_err());
    }

    #[test]
    fn empty_phrases_disappear() {
        let q = parse("\"\" OR x");
        assert_eq!(q.phrases.len(), 1);
        assert_eq!(q.expr, Some(QueryExpr::Phrase(0)));
        assert_eq!(parse("!!!").expr, None);
    }

    #[test]
    fn query_terms_are_stemmed() {
        let tokenizer = BuiltinTokenizer::new(TokenizerKind::Unicode61, Some(Language::English));
        let q = parse_query("Unites", &[], None, &tokenizer).unwrap();
        assert_eq!(q.phrases[0].terms[0].term, "unit");
    }
}
