//! SQL tokenizer.

use crate::error::{DbError, DbResult};
use std::ops::Range;

/// Highest parameter number a statement may use.
pub const MAX_PARAMETER: usize = 32_766;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare identifier or keyword, case preserved.
    Word(String),
    /// Identifier written as `"x"`, `[x]` or `` `x` ``. Never a keyword.
    QuotedIdent(String),
    /// `'string'` literal with `''` unescaped.
    String(String),
    /// Integer literal.
    Integer(i64),
    /// Real literal, or an integer literal too large for `i64`.
    Real(f64),
    /// `X'..'` literal.
    Blob(Vec<u8>),
    /// `?`, `?N`, `:name`, `@name` or `$name`.
    Param(ParamToken),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// `.`
    Dot,
    /// `*`
    Star,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `||`
    Concat,
    /// `=` or `==`
    Eq,
    /// `!=` or `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `~`
    Tilde,
    /// `<<`
    ShiftLeft,
    /// `>>`
    ShiftRight,
}

/// Parameter placeholder as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamToken {
    /// `?`
    Next,
    /// `?N` (1-based).
    Numbered(usize),
    /// `:name`, `@name`, `$name` (prefix included).
    Named(String),
}

/// A token and the byte range of the text it was read from.
pub type Spanned = (Token, Range<usize>);

impl Token {
    /// Returns true if this is the bare keyword `kw` (case-insensitive).
    #[must_use]
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Self::Word(w) if w.eq_ignore_ascii_case(kw))
    }
}

/// Splits SQL text into tokens. Comments and whitespace are dropped.
pub fn tokenize(sql: &str) -> DbResult<Vec<Spanned>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = sql[i + 2..]
                    .find("*/")
                    .ok_or_else(|| DbError::compile("unterminated comment"))?;
                i += end + 4;
            }
            b'\'' => {
                let (text, next) = quoted(sql, i, b'\'')?;
                tokens.push(Token::String(text));
                i = next;
            }
            b'"' | b'`' => {
                let (text, next) = quoted(sql, i, c)?;
                tokens.push(Token::QuotedIdent(text));
                i = next;
            }
            b'[' => {
                let end = sql[i + 1..]
                    .find(']')
                    .ok_or_else(|| DbError::compile("unterminated [identifier]"))?;
                tokens.push(Token::QuotedIdent(sql[i + 1..i + 1 + end].to_string()));
                i += end + 2;
            }
            b'x' | b'X' if bytes.get(i + 1) == Some(&b'\'') => {
                let (hex, next) = quoted(sql, i + 1, b'\'')?;
                tokens.push(Token::Blob(decode_hex(&hex)?));
                i = next;
            }
            b'0'..=b'9' => {
                let (token, next) = number(sql, i)?;
                tokens.push(token);
                i = next;
            }
            b'.' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                let (token, next) = number(sql, i)?;
                tokens.push(token);
                i = next;
            }
            b'?' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end == start {
                    tokens.push(Token::Param(ParamToken::Next));
                } else {
                    let n: usize = sql[start..end]
                        .parse()
                        .map_err(|_| DbError::compile("bad parameter number"))?;
                    if n == 0 || n > MAX_PARAMETER {
                        return Err(DbError::compile(format!(
                            "parameter number must be between 1 and {MAX_PARAMETER}"
                        )));
                    }
                    tokens.push(Token::Param(ParamToken::Numbered(n)));
                }
                i = end;
            }
            b':' | b'@' | b'$' => {
                let mut end = i + 1;
                while end < bytes.len() && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                if end == i + 1 {
                    return Err(DbError::compile(format!("unexpected '{}'", c as char)));
                }
                tokens.push(Token::Param(ParamToken::Named(sql[i..end].to_string())));
                i = end;
            }
            c if is_ident_start(c) => {
                let mut end = i + 1;
                while end < bytes.len() && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                tokens.push(Token::Word(sql[i..end].to_string()));
                i = end;
            }
            _ => {
                let next = bytes.get(i + 1).copied();
                let (token, len) = match (c, next) {
                    (b'|', Some(b'|')) => (Token::Concat, 2),
                    (b'=', Some(b'=')) => (Token::Eq, 2),
                    (b'!', Some(b'=')) => (Token::Ne, 2),
                    (b'<', Some(b'>')) => (Token::Ne, 2),
                    (b'<', Some(b'=')) => (Token::Le, 2),
                    (b'>', Some(b'=')) => (Token::Ge, 2),
                    (b'<', Some(b'<')) => (Token::ShiftLeft, 2),
                    (b'>', Some(b'>')) => (Token::ShiftRight, 2),
                    (b'(', _) => (Token::LParen, 1),
                    (b')', _) => (Token::RParen, 1),
                    (b',', _) => (Token::Comma, 1),
                    (b';', _) => (Token::Semicolon, 1),
                    (b'.', _) => (Token::Dot, 1),
                    (b'*', _) => (Token::Star, 1),
                    (b'+', _) => (Token::Plus, 1),
                    (b'-', _) => (Token::Minus, 1),
                    (b'/', _) => (Token::Slash, 1),
                    (b'%', _) => (Token::Percent, 1),
                    (b'=', _) => (Token::Eq, 1),
                    (b'<', _) => (Token::Lt, 1),
                    (b'>', _) => (Token::Gt, 1),
                    (b'&', _) => (Token::BitAnd, 1),
                    (b'|', _) => (Token::BitOr, 1),
                    (b'~', _) => (Token::Tilde, 1),
                    _ => {
                        let ch = sql[i..].chars().next().unwrap_or('?');
                        return Err(DbError::compile(format!("unrecognized token: \"{ch}\"")));
                    }
                };
                tokens.push(token);
                i += len;
            }
        }
        if tokens.len() > spans.len() {
            spans.push(start..i);
        }
    }
    Ok(tokens.into_iter().zip(spans).collect())
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80
}

/// Reads a quoted run starting at the opening quote; a doubled quote
/// stands for itself. Returns the text and the index after the closing quote.
fn quoted(sql: &str, start: usize, quote: u8) -> DbResult<(String, usize)> {
    let bytes = sql.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;
    let mut run = i;
    loop {
        if i >= bytes.len() {
            return Err(DbError::compile("unterminated quoted text"));
        }
        if bytes[i] == quote {
            out.push_str(&sql[run..i]);
            if bytes.get(i + 1) == Some(&quote) {
                out.push(quote as char);
                i += 2;
                run = i;
                continue;
            }
            return Ok((out, i + 1));
        }
        i += 1;
    }
}

fn number(sql: &str, start: usize) -> DbResult<(Token, usize)> {
    let bytes = sql.as_bytes();
    let mut i = start;

    if bytes[i] == b'0' && matches!(bytes.get(i + 1), Some(b'x' | b'X')) {
        let digits_start = i + 2;
        i = digits_start;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            i += 1;
        }
        let value = u64::from_str_radix(&sql[digits_start..i], 16)
            .map_err(|_| DbError::compile("malformed hex integer"))?;
        return Ok((Token::Integer(value as i64), i));
    }

    let mut is_real = false;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        is_real = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            is_real = true;
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    if i < bytes.len() && is_ident_start(bytes[i]) {
        return Err(DbError::compile(format!(
            "unrecognized token: \"{}\"",
            &sql[start..=i]
        )));
    }

    let text = &sql[start..i];
    if !is_real {
        if let Ok(v) = text.parse::<i64>() {
            return Ok((Token::Integer(v), i));
        }
    }
    let v = text
        .parse::<f64>()
        .map_err(|_| DbError::compile(format!("malformed number {text}")))?;
    Ok((Token::Real(v), i))
}

fn decode_hex(hex: &str) -> DbResult<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DbError::compile(format!("malformed blob literal X'{hex}'")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| DbError::compile("malformed blob literal"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> DbResult<Vec<Token>> {
        Ok(tokenize(sql)?.into_iter().map(|(token, _)| token).collect())
    }

    #[test]
    fn words_strings_and_punctuation() {
        let tokens = kinds("SELECT x, 'it''s' FROM t1;").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("SELECT".into()),
                Token::Word("x".into()),
                Token::Comma,
                Token::String("it's".into()),
                Token::Word("FROM".into()),
                Token::Word("t1".into()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn numbers_blobs_and_params() {
        let tokens = kinds("1 2.5 .5 1e3 0x10 X'12aB' ? ?3 :name").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Integer(1),
                Token::Real(2.5),
                Token::Real(0.5),
                Token::Real(1000.0),
                Token::Integer(16),
                Token::Blob(vec![0x12, 0xAB]),
                Token::Param(ParamToken::Next),
                Token::Param(ParamToken::Numbered(3)),
                Token::Param(ParamToken::Named(":name".into())),
            ]
        );
    }

    #[test]
    fn quoted_identifiers_and_comments() {
        let tokens = kinds("\"a b\" [c] `d` -- trailing\n/* block */ e").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::QuotedIdent("a b".into()),
                Token::QuotedIdent("c".into()),
                Token::QuotedIdent("d".into()),
                Token::Word("e".into()),
            ]
        );
    }

    #[test]
    fn operators() {
        let tokens = kinds("a||b <> c != d <= e == f << 2").unwrap();
        assert!(tokens.contains(&Token::Concat));
        assert_eq!(tokens.iter().filter(|t| **t == Token::Ne).count(), 2);
        assert!(tokens.contains(&Token::Le));
        assert!(tokens.contains(&Token::Eq));
        assert!(tokens.contains(&Token::ShiftLeft));
    }

    #[test]
    fn non_ascii_text_survives() {
        let tokens = kinds("'a\u{1F601}b'").unwrap();
        assert_eq!(tokens, vec![Token::String("a\u{1F601}b".into())]);
    }

    #[test]
    fn parameter_numbers_are_bounded() {
        assert!(kinds("?32766").is_ok());
        assert!(kinds("?32767").is_err());
        assert!(kinds("?9999999999").is_err());
        assert!(kinds("?99999999999999999999999").is_err());
        assert!(kinds("?0").is_err());
    }

    #[test]
    fn errors() {
        assert!(kinds("'open").is_err());
        assert!(kinds("X'123'").is_err());
        assert!(kinds("12abc").is_err());
        assert!(kinds("a # b").is_err());
    }

    #[test]
    fn spans_cover_the_source_text() {
        let sql = "SELECT -9223372036854775808 - 1, 'a''b' -- note\n FROM t";
        let texts: Vec<&str> = tokenize(sql)
            .unwrap()
            .into_iter()
            .map(|(_, span)| &sql[span])
            .collect();
        assert_eq!(
            texts,
            vec!["SELECT", "-", "9223372036854775808", "-", "1", ",", "'a''b'", "FROM", "t"]
        );
    }
}
