//! Built-in scalar and aggregate functions.

use super::expr::{CExpr, Ctx};
use super::Env;
use crate::error::{DbError, DbResult};
use crate::record::encode_record;
use crate::value::{format_real, Affinity, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Version reported by `sqlite_version()`.
pub(crate) const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scalar {
    Abs,
    Changes,
    Coalesce,
    Hex,
    IfNull,
    Iif,
    Instr,
    LastInsertRowid,
    Length,
    Lower,
    LTrim,
    Max,
    Min,
    NullIf,
    Quote,
    Replace,
    Round,
    RTrim,
    SqliteVersion,
    Substr,
    Trim,
    Typeof,
    Upper,
}

impl Scalar {
    /// Resolves a function name. Fails if the name is known but the argument
    /// count is not.
    pub fn lookup(name: &str, nargs: usize) -> DbResult<Option<Self>> {
        let (scalar, arity): (Self, &dyn Fn(usize) -> bool) = match name {
            "abs" => (Self::Abs, &|n| n == 1),
            "changes" => (Self::Changes, &|n| n == 0),
            "coalesce" => (Self::Coalesce, &|n| n >= 2),
            "hex" => (Self::Hex, &|n| n == 1),
            "ifnull" => (Self::IfNull, &|n| n == 2),
            "iif" => (Self::Iif, &|n| n == 3),
            "instr" => (Self::Instr, &|n| n == 2),
            "last_insert_rowid" => (Self::LastInsertRowid, &|n| n == 0),
            "length" => (Self::Length, &|n| n == 1),
            "lower" => (Self::Lower, &|n| n == 1),
            "ltrim" => (Self::LTrim, &|n| n == 1 || n == 2),
            "max" => (Self::Max, &|n| n >= 2),
            "min" => (Self::Min, &|n| n >= 2),
            "nullif" => (Self::NullIf, &|n| n == 2),
            "quote" => (Self::Quote, &|n| n == 1),
            "replace" => (Self::Replace, &|n| n == 3),
            "round" => (Self::Round, &|n| n == 1 || n == 2),
            "rtrim" => (Self::RTrim, &|n| n == 1 || n == 2),
            "sqlite_version" => (Self::SqliteVersion, &|n| n == 0),
            "substr" | "substring" => (Self::Substr, &|n| n == 2 || n == 3),
            "trim" => (Self::Trim, &|n| n == 1 || n == 2),
            "typeof" => (Self::Typeof, &|n| n == 1),
            "upper" => (Self::Upper, &|n| n == 1),
            _ => return Ok(None),
        };
        if arity(nargs) {
            Ok(Some(scalar))
        } else {
            Err(DbError::compile(format!(
                "wrong number of arguments to function {name}()"
            )))
        }
    }

    /// Returns false for functions whose result depends on connection state.
    pub fn is_deterministic(self) -> bool {
        !matches!(self, Self::Changes | Self::LastInsertRowid)
    }

    /// Calls the function.
    pub fn call(self, args: &[Value], env: &Env<'_>) -> DbResult<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
        Ok(match self {
            Self::Abs => match arg(0).to_numeric() {
                Value::Integer(i) => Value::Integer(
                    i.checked_abs()
                        .ok_or_else(|| DbError::runtime("integer overflow"))?,
                ),
                Value::Real(r) => Value::Real(r.abs()),
                other => other,
            },
            Self::Changes => Value::Integer(env.changes as i64),
            Self::Coalesce => args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null),
            Self::Hex => {
                let bytes = match arg(0) {
                    Value::Null => Vec::new(),
                    Value::Blob(b) => b,
                    other => other.to_text().unwrap_or_default().into_bytes(),
                };
                Value::Text(bytes.iter().map(|b| format!("{b:02X}")).collect())
            }
            Self::IfNull => {
                if arg(0).is_null() {
                    arg(1)
                } else {
                    arg(0)
                }
            }
            Self::Iif => {
                if arg(0).truthiness() == Some(true) {
                    arg(1)
                } else {
                    arg(2)
                }
            }
            Self::Instr => match (arg(0), arg(1)) {
                (Value::Null, _) | (_, Value::Null) => Value::Null,
                (Value::Blob(h), Value::Blob(n)) => Value::Integer(
                    find_bytes(&h, &n).map_or(0, |p| p as i64 + 1),
                ),
                (h, n) => {
                    let (h, n) = (h.to_text().unwrap_or_default(), n.to_text().unwrap_or_default());
                    Value::Integer(h.find(&n).map_or(0, |p| h[..p].chars().count() as i64 + 1))
                }
            },
            Self::LastInsertRowid => Value::Integer(env.last_insert_rowid),
            Self::Length => match arg(0) {
                Value::Null => Value::Null,
                Value::Blob(b) => Value::Integer(b.len() as i64),
                Value::Text(s) => Value::Integer(s.chars().count() as i64),
                other => Value::Integer(other.to_text().map_or(0, |s| s.chars().count()) as i64),
            },
            Self::Lower => text_map(arg(0), |s| s.to_lowercase()),
            Self::Upper => text_map(arg(0), |s| s.to_uppercase()),
            Self::LTrim | Self::RTrim | Self::Trim => {
                let chars: Vec<char> = match args.get(1) {
                    Some(Value::Null) => return Ok(Value::Null),
                    Some(set) => set.to_text().unwrap_or_default().chars().collect(),
                    None => vec![' '],
                };
                text_map(arg(0), |s| match self {
                    Self::LTrim => s.trim_start_matches(chars.as_slice()).to_string(),
                    Self::RTrim => s.trim_end_matches(chars.as_slice()).to_string(),
                    _ => s.trim_matches(chars.as_slice()).to_string(),
                })
            }
            Self::Max | Self::Min => {
                if args.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                let wanted = if self == Self::Max {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
                let mut best = arg(0);
                for v in &args[1..] {
                    if v.compare(&best) == wanted {
                        best = v.clone();
                    }
                }
                best
            }
            Self::NullIf => {
                let (a, b) = (arg(0), arg(1));
                if !a.is_null() && !b.is_null() && a.compare(&b) == Ordering::Equal {
                    Value::Null
                } else {
                    a
                }
            }
            Self::Quote => Value::Text(match arg(0) {
                Value::Null => "NULL".to_string(),
                Value::Integer(i) => i.to_string(),
                Value::Real(r) => format_real(r),
                Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
                Value::Blob(b) => format!("X'{}'", b.iter().map(|b| format!("{b:02X}")).collect::<String>()),
            }),
            Self::Replace => match (arg(0).to_text(), arg(1).to_text(), arg(2).to_text()) {
                (Some(s), Some(from), Some(to)) if !from.is_empty() => Value::Text(s.replace(&from, &to)),
                (Some(s), Some(_), Some(_)) => Value::Text(s),
                _ => Value::Null,
            },
            Self::Round => {
                let Some(x) = arg(0).as_f64() else {
                    return Ok(Value::Null);
                };
                let digits = arg(1).as_i64().unwrap_or(0).clamp(0, 30) as i32;
                let factor = 10f64.powi(digits);
                let rounded = (x * factor).round() / factor;
                Value::Real(if rounded.is_finite() { rounded } else { x })
            }
            Self::SqliteVersion => Value::from(ENGINE_VERSION),
            Self::Substr => substr(&arg(0), arg(1).as_i64(), args.get(2).map(Value::as_i64)),
            Self::Typeof => Value::from(arg(0).type_name()),
        })
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn text_map(v: Value, f: impl FnOnce(&str) -> String) -> Value {
    match v.to_text() {
        Some(s) => Value::Text(f(&s)),
        None => Value::Null,
    }
}

/// `substr(x, start[, len])` with 1-based, possibly negative positions,
/// counted in characters for text and bytes for blobs.
fn substr(value: &Value, start: Option<i64>, len: Option<Option<i64>>) -> Value {
    let (Some(start), false) = (start, value.is_null() || len == Some(None)) else {
        return Value::Null;
    };
    // Positions are widened so that extreme arguments clamp instead of overflowing.
    let slice = |total: usize| -> (usize, usize) {
        let total = total as i128;
        let mut first = i128::from(start);
        let (mut count, backwards) = match len.flatten() {
            Some(l) => (i128::from(l).abs(), l < 0),
            None => (1 << 64, false),
        };
        if first < 0 {
            first += total;
            if first < 0 {
                count = (count + first).max(0);
                first = 0;
            }
        } else if first > 0 {
            first -= 1;
        } else if count > 0 {
            count -= 1;
        }
        if backwards {
            first -= count;
            if first < 0 {
                count += first;
                first = 0;
            }
        }
        let from = first.min(total);
        let to = (first + count.max(0)).clamp(from, total);
        (from as usize, to as usize)
    };
    match value {
        Value::Blob(b) => {
            let (from, to) = slice(b.len());
            Value::Blob(b[from..to].to_vec())
        }
        other => {
            let text = other.to_text().unwrap_or_default();
            let chars: Vec<char> = text.chars().collect();
            let (from, to) = slice(chars.len());
            Value::Text(chars[from..to].iter().collect())
        }
    }
}

/// `CAST(v AS type)`.
pub(crate) fn cast(v: Value, affinity: Affinity) -> Value {
    if v.is_null() {
        return v;
    }
    match affinity {
        Affinity::Blob => match v {
            Value::Blob(_) => v,
            other => Value::Blob(other.to_text().unwrap_or_default().into_bytes()),
        },
        Affinity::Text => Value::Text(v.to_text().unwrap_or_default()),
        Affinity::Integer => Value::Integer(v.as_i64().unwrap_or(0)),
        Affinity::Real => Value::Real(v.as_f64().unwrap_or(0.0)),
        Affinity::Numeric => match v.to_numeric() {
            Value::Real(r) if r.fract() == 0.0 && r.abs() < 9.0e18 => Value::Integer(r as i64),
            other => other,
        },
    }
}

/// `LIKE`: `%` matches any run, `_` one character, ASCII case-insensitive.
pub(crate) fn like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    wildcard(&p, &t, '%', '_', |a, b| a.eq_ignore_ascii_case(&b))
}

/// `GLOB`: `*`, `?`, and `[...]` classes, case-sensitive.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob(&p, &t)
}

fn wildcard(p: &[char], t: &[char], any: char, one: char, eq: impl Fn(char, char) -> bool + Copy) -> bool {
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && p[pi] == any {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && (p[pi] == one || eq(p[pi], t[ti])) {
            pi += 1;
            ti += 1;
        } else if let Some((bp, bt)) = backtrack {
            pi = bp + 1;
            ti = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == any)
}

fn glob(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => (0..=t.len()).any(|i| glob(&p[1..], &t[i..])),
        Some('?') => !t.is_empty() && glob(&p[1..], &t[1..]),
        Some('[') => {
            let Some(close) = p.iter().skip(2).position(|c| *c == ']').map(|i| i + 2) else {
                return !t.is_empty() && t[0] == '[' && glob(&p[1..], &t[1..]);
            };
            let Some(&c) = t.first() else {
                return false;
            };
            let (negate, class) = match p[1] {
                '^' => (true, &p[2..close]),
                _ => (false, &p[1..close]),
            };
            let mut hit = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == '-' {
                    hit |= class[i] <= c && c <= class[i + 2];
                    i += 3;
                } else {
                    hit |= class[i] == c;
                    i += 1;
                }
            }
            hit != negate && glob(&p[close + 1..], &t[1..])
        }
        Some(&c) => t.first() == Some(&c) && glob(&p[1..], &t[1..]),
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggFunc {
    CountStar,
    Count,
    Sum,
    Total,
    Avg,
    Min,
    Max,
    GroupConcat,
}

impl AggFunc {
    /// Resolves an aggregate call. Single-argument `min`/`max` aggregate;
    /// with more arguments they are scalar.
    pub fn lookup(name: &str, nargs: usize, star: bool) -> Option<Self> {
        Some(match (name, nargs, star) {
            ("count", 0, true) => Self::CountStar,
            ("count", 1, false) => Self::Count,
            ("sum", 1, false) => Self::Sum,
            ("total", 1, false) => Self::Total,
            ("avg", 1, false) => Self::Avg,
            ("min", 1, false) => Self::Min,
            ("max", 1, false) => Self::Max,
            ("group_concat", 1 | 2, false) => Self::GroupConcat,
            _ => return None,
        })
    }
}

/// A compiled aggregate call.
#[derive(Debug, Clone)]
pub(crate) struct AggSpec {
    func: AggFunc,
    args: Vec<CExpr>,
    distinct: bool,
}

impl AggSpec {
    pub fn new(func: AggFunc, args: Vec<CExpr>, distinct: bool) -> DbResult<Self> {
        if distinct && args.len() != 1 {
            return Err(DbError::compile(
                "DISTINCT aggregates must have exactly one argument",
            ));
        }
        Ok(Self {
            func,
            args,
            distinct,
        })
    }

    /// Fresh accumulator.
    pub fn start(&self) -> AggState {
        AggState {
            count: 0,
            int_sum: Some(0),
            real_sum: 0.0,
            saw_real: false,
            best: None,
            concat: None,
            seen: HashSet::new(),
        }
    }

    /// Feeds one row.
    pub fn step(&self, state: &mut AggState, ctx: &Ctx<'_>) -> DbResult<()> {
        if self.func == AggFunc::CountStar {
            state.count += 1;
            return Ok(());
        }
        let value = self.args[0].eval(ctx)?;
        if value.is_null() {
            return Ok(());
        }
        if self.distinct && !state.seen.insert(encode_record(std::slice::from_ref(&value))) {
            return Ok(());
        }
        state.count += 1;
        match self.func {
            AggFunc::CountStar | AggFunc::Count => {}
            AggFunc::Sum | AggFunc::Total | AggFunc::Avg => match value.to_numeric() {
                Value::Integer(i) => {
                    state.int_sum = state.int_sum.and_then(|s| s.checked_add(i));
                    state.real_sum += i as f64;
                }
                Value::Real(r) => {
                    state.saw_real = true;
                    state.real_sum += r;
                }
                _ => {}
            },
            AggFunc::Min | AggFunc::Max => {
                let wanted = if self.func == AggFunc::Max {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
                if state.best.as_ref().is_none_or(|b| value.compare(b) == wanted) {
                    state.best = Some(value);
                }
            }
            AggFunc::GroupConcat => {
                let text = value.to_text().unwrap_or_default();
                match &mut state.concat {
                    None => state.concat = Some(text),
                    Some(acc) => {
                        let separator = match self.args.get(1) {
                            Some(sep) => sep.eval(ctx)?.to_text().unwrap_or_default(),
                            None => ",".to_string(),
                        };
                        acc.push_str(&separator);
                        acc.push_str(&text);
                    }
                }
            }
        }
        Ok(())
    }

    /// Final value.
    pub fn finish(&self, state: AggState) -> DbResult<Value> {
        Ok(match self.func {
            AggFunc::CountStar | AggFunc::Count => Value::Integer(state.count as i64),
            AggFunc::Sum if state.count == 0 => Value::Null,
            AggFunc::Sum => match state.int_sum {
                Some(i) if !state.saw_real => Value::Integer(i),
                _ if state.saw_real => Value::Real(state.real_sum),
                _ => return Err(DbError::runtime("integer overflow")),
            },
            AggFunc::Total => Value::Real(state.real_sum),
            AggFunc::Avg if state.count == 0 => Value::Null,
            AggFunc::Avg => Value::Real(state.real_sum / state.count as f64),
            AggFunc::Min | AggFunc::Max => state.best.unwrap_or(Value::Null),
            AggFunc::GroupConcat => state.concat.map_or(Value::Null, Value::Text),
        })
    }
}

/// Running state of one aggregate in one group.
#[derive(Debug)]
pub(crate) struct AggState {
    count: u64,
    int_sum: Option<i64>,
    real_sum: f64,
    saw_real: bool,
    best: Option<Value>,
    concat: Option<String>,
    seen: HashSet<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_and_glob() {
        assert!(like_match("a%c", "ABC"));
        assert!(like_match("_b_", "abc"));
        assert!(!like_match("a_c", "ac"));
        assert!(like_match("%", ""));
        assert!(glob_match("a*[0-9]", "abc7"));
        assert!(!glob_match("a*[^0-9]", "abc7"));
        assert!(glob_match("?b?", "abc"));
        assert!(!glob_match("A*", "abc"));
    }

    #[test]
    fn substr_positions() {
        let s = Value::from("hello");
        assert_eq!(substr(&s, Some(2), Some(Some(3))), Value::from("ell"));
        assert_eq!(substr(&s, Some(-3), None), Value::from("llo"));
        assert_eq!(substr(&s, Some(0), Some(Some(2))), Value::from("h"));
        assert_eq!(substr(&s, Some(3), Some(Some(-2))), Value::from("he"));
        assert_eq!(substr(&Value::from("日本語"), Some(2), Some(Some(1))), Value::from("本"));
        assert_eq!(substr(&s, Some(-7), None), Value::from("hello"));
        assert_eq!(substr(&s, Some(-7), Some(Some(3))), Value::from("h"));
        assert_eq!(substr(&s, Some(9), Some(Some(2))), Value::from(""));
        assert_eq!(
            substr(&Value::Blob(vec![1, 2, 3]), Some(0), Some(Some(2))),
            Value::Blob(vec![1])
        );
    }

    #[test]
    fn substr_extreme_arguments_clamp() {
        let s = Value::from("hello");
        assert_eq!(substr(&s, Some(2), Some(Some(i64::MAX))), Value::from("ello"));
        assert_eq!(substr(&s, Some(3), Some(Some(i64::MIN))), Value::from("he"));
        assert_eq!(substr(&s, Some(i64::MIN), Some(Some(i64::MAX))), Value::from("hell"));
        assert_eq!(substr(&s, Some(i64::MAX), None), Value::from(""));
        assert_eq!(substr(&s, Some(i64::MIN), None), Value::from("hello"));
    }

    #[test]
    fn scalar_functions() {
        let env = Env::default();
        let call = |name: &str, args: &[Value]| {
            Scalar::lookup(name, args.len()).unwrap().unwrap().call(args, &env).unwrap()
        };
        assert_eq!(call("abs", &[Value::Integer(-3)]), Value::Integer(3));
        assert_eq!(call("coalesce", &[Value::Null, Value::from("x")]), Value::from("x"));
        assert_eq!(call("hex", &[Value::Blob(vec![0xAB, 1])]), Value::from("AB01"));
        assert_eq!(call("length", &[Value::from("日本")]), Value::Integer(2));
        assert_eq!(call("upper", &[Value::from("abc")]), Value::from("ABC"));
        assert_eq!(call("typeof", &[Value::Real(1.0)]), Value::from("real"));
        assert_eq!(call("round", &[Value::Real(2.567), Value::Integer(2)]), Value::Real(2.57));
        assert_eq!(call("max", &[Value::Integer(1), Value::Integer(5), Value::Integer(3)]), Value::Integer(5));
        assert_eq!(call("trim", &[Value::from("  x  ")]), Value::from("x"));
        assert_eq!(call("quote", &[Value::from("it's")]), Value::from("'it''s'"));
        assert!(Scalar::lookup("abs", 2).is_err());
        assert!(Scalar::lookup("nonesuch", 1).unwrap().is_none());
    }

    #[test]
    fn sums_stay_integral_until_a_real_appears() {
        let spec = |func| AggSpec::new(func, vec![CExpr::Param(0)], false).unwrap();
        let run = |spec: &AggSpec, values: &[Value]| {
            let mut state = spec.start();
            for v in values {
                let params = [v.clone()];
                let env = Env {
                    params: &params,
                    ..Env::default()
                };
                spec.step(&mut state, &Ctx::new(&env, None)).unwrap();
            }
            spec.finish(state).unwrap()
        };
        assert_eq!(run(&spec(AggFunc::Sum), &[Value::Integer(3), Value::Integer(7)]), Value::Integer(10));
        assert_eq!(run(&spec(AggFunc::Sum), &[Value::Integer(1), Value::Real(0.5)]), Value::Real(1.5));
        assert_eq!(run(&spec(AggFunc::Sum), &[]), Value::Null);
        assert_eq!(run(&spec(AggFunc::Total), &[]), Value::Real(0.0));
        assert_eq!(run(&spec(AggFunc::Avg), &[Value::Integer(1), Value::Integer(2)]), Value::Real(1.5));
        assert_eq!(run(&spec(AggFunc::Count), &[Value::Null, Value::Integer(2)]), Value::Integer(1));
        assert_eq!(
            run(&spec(AggFunc::GroupConcat), &[Value::from("a"), Value::Null, Value::from("b")]),
            Value::from("a,b")
        );
    }
}
