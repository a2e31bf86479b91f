//! SQL values, type affinity, and comparison rules.

use std::cmp::Ordering;
use std::fmt;

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// IEEE 754 double.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

/// Column type affinity, derived from the declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Values are stored as given.
    Blob,
    /// Numbers are converted to text.
    Text,
    /// Text that looks numeric becomes INTEGER or REAL.
    Numeric,
    /// Like numeric, but integral reals become INTEGER.
    Integer,
    /// Numbers become REAL.
    Real,
}

impl Affinity {
    /// Derives the affinity of a declared type name.
    #[must_use]
    pub fn from_declared_type(decl: Option<&str>) -> Self {
        let Some(decl) = decl else {
            return Self::Blob;
        };
        let upper = decl.to_ascii_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            Self::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }
}

impl Value {
    /// Returns the SQL type name as reported by `typeof()`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }

    /// Returns true for `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the text form of the value, or `None` for `NULL`.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(i) => Some(i.to_string()),
            Self::Real(r) => Some(format_real(*r)),
            Self::Text(s) => Some(s.clone()),
            Self::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// Borrows the text of a `TEXT` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to a number following SQL coercion rules.
    ///
    /// Text uses its longest numeric prefix; blobs and non-numeric text are 0.
    /// Returns `Null` for `NULL`.
    #[must_use]
    pub fn to_numeric(&self) -> Value {
        match self {
            Self::Null => Self::Null,
            Self::Integer(_) | Self::Real(_) => self.clone(),
            Self::Text(s) => numeric_prefix(s),
            Self::Blob(b) => numeric_prefix(&String::from_utf8_lossy(b)),
        }
    }

    /// Returns the value as a float, or `None` for `NULL`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self.to_numeric() {
            Self::Integer(i) => Some(i as f64),
            Self::Real(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the value as an integer, or `None` for `NULL`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self.to_numeric() {
            Self::Integer(i) => Some(i),
            Self::Real(r) => Some(r as i64),
            _ => None,
        }
    }

    /// Evaluates the value as a condition: `None` for `NULL`, otherwise
    /// whether it is numerically non-zero.
    #[must_use]
    pub fn truthiness(&self) -> Option<bool> {
        match self.to_numeric() {
            Self::Integer(i) => Some(i != 0),
            Self::Real(r) => Some(r != 0.0),
            _ => None,
        }
    }

    /// Applies a column affinity to a value about to be stored.
    #[must_use]
    pub fn with_affinity(self, affinity: Affinity) -> Value {
        match affinity {
            Affinity::Blob => self,
            Affinity::Text => match self {
                Self::Integer(_) | Self::Real(_) => Self::Text(self.to_text().unwrap_or_default()),
                other => other,
            },
            Affinity::Numeric | Affinity::Integer | Affinity::Real => {
                let converted = match &self {
                    Self::Text(s) => parse_exact_number(s.trim()).unwrap_or(self),
                    _ => self,
                };
                match (affinity, converted) {
                    (Affinity::Real, Self::Integer(i)) => Self::Real(i as f64),
                    (Affinity::Integer | Affinity::Numeric, Self::Real(r))
                        if r.fract() == 0.0 && r.abs() < 9.0e18 =>
                    {
                        Self::Integer(r as i64)
                    }
                    (_, other) => other,
                }
            }
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Integer(_) | Self::Real(_) => 1,
            Self::Text(_) => 2,
            Self::Blob(_) => 3,
        }
    }

    /// Total order used by `ORDER BY`, `min`/`max`, and comparisons:
    /// `NULL` < numbers < text < blobs.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Integer(a), Self::Real(b)) => (*a as f64).total_cmp(b),
            (Self::Real(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Self::Real(a), Self::Real(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::Blob(a), Self::Blob(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Formats a real the way SQL engines print doubles: 15 significant digits,
/// integral values keep a trailing `.0`.
#[must_use]
pub fn format_real(r: f64) -> String {
    if r.is_nan() {
        return "NaN".to_string();
    }
    if r.is_infinite() {
        return if r > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if r.fract() == 0.0 && r.abs() < 1.0e15 {
        return format!("{r:.1}");
    }
    let rounded: f64 = format!("{r:.14e}").parse().unwrap_or(r);
    format!("{rounded}")
}

/// Parses text that is entirely a number (surrounding whitespace excluded).
fn parse_exact_number(s: &str) -> Option<Value> {
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    let looks_numeric = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if looks_numeric {
        if let Ok(r) = s.parse::<f64>() {
            return Some(Value::Real(r));
        }
    }
    None
}

/// Converts the longest numeric prefix of `s` to a number (0 if none).
fn numeric_prefix(s: &str) -> Value {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut is_real = false;
    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac_end = end + 1;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > end + 1 || end > digits_start {
            is_real = true;
            end = frac_end;
        }
    }
    if end == digits_start {
        return Value::Integer(0);
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            is_real = true;
            end = exp_end;
        }
    }
    let prefix = &t[..end];
    if !is_real {
        if let Ok(i) = prefix.parse::<i64>() {
            return Value::Integer(i);
        }
    }
    prefix.parse::<f64>().map_or(Value::Integer(0), Value::Real)
}
