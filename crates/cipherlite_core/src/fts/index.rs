//! Inverted index of one full-text table.
//!
//! ## Layout
//!
//! Three B-trees per table:
//!
//! ```text
//! content: rowid                  -> record(column values)
//! terms:   term 0x00 rowid        -> (column, count, position deltas...)*
//!          0x00                   -> record(doc count, tokens per column...)
//! docsize: rowid                  -> record(tokens per column)
//! ```
//!
//! Terms never contain NUL, so `term 0x00` is an exact prefix and the
//! statistics key sorts before every term. Rows of one term are ordered by
//! row id through the key encoding.

use super::query::{parse_query, Phrase, QueryExpr, QueryTerm};
use super::tokenizer::Tokenizer;
use crate::btree::{self, Cursor};
use crate::error::{DbError, DbResult};
use crate::pager::{PageRead, PageWrite};
use crate::record::{decode_record, encode_record, get_varint, put_varint};
use crate::types::{rowid_from_key, rowid_key, RowId};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const STATS_KEY: &[u8] = &[0];

/// Root pages of a full-text table's trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtsRoots {
    /// Row id to column values.
    pub content: u32,
    /// Term postings and table statistics.
    pub terms: u32,
    /// Row id to token counts.
    pub docsize: u32,
}

/// Per-column positions of one term in one row.
type ColumnPositions = Vec<Vec<u32>>;

/// A full-text table bound to its tokenizer.
pub struct FtsIndex {
    name: String,
    columns: Vec<String>,
    roots: FtsRoots,
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for FtsIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtsIndex")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

/// Statistics shared by every row of one full-text query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStats {
    phrases: usize,
    columns: usize,
    doc_count: u64,
    column_totals: Vec<u64>,
    /// `[hits across all rows, rows with hits]` per phrase and column.
    global: Vec<[u32; 2]>,
}

/// One row matched by a full-text query.
#[derive(Debug, Clone)]
pub struct FtsHit {
    /// Row id.
    pub rowid: RowId,
    /// Column values.
    pub values: Vec<Value>,
    stats: Arc<QueryStats>,
    /// Hits per phrase and column in this row.
    row_hits: Vec<u32>,
    lengths: Vec<u64>,
}

impl FtsHit {
    /// Encodes `matchinfo` for this row. Each letter of `format` appends
    /// little-endian `u32` values:
    ///
    /// - `p`: phrase count
    /// - `c`: column count
    /// - `x`: per phrase and column, hits in this row, hits in all rows,
    ///   and rows with hits
    /// - `n`: rows in the table
    /// - `a`: per column, average tokens per row
    /// - `l`: per column, tokens in this row
    pub fn matchinfo(&self, format: &str) -> DbResult<Vec<u8>> {
        let stats = &self.stats;
        let mut words: Vec<u32> = Vec::new();
        for request in format.chars() {
            match request {
                'p' => words.push(stats.phrases as u32),
                'c' => words.push(stats.columns as u32),
                'x' => {
                    for (row, [all, docs]) in self.row_hits.iter().zip(&stats.global) {
                        words.extend([*row, *all, *docs]);
                    }
                }
                'n' => words.push(saturate(stats.doc_count)),
                'a' => words.extend(stats.column_totals.iter().map(|total| {
                    saturate(total.checked_div(stats.doc_count).unwrap_or(0))
                })),
                'l' => words.extend(self.lengths.iter().map(|l| saturate(*l))),
                other => {
                    return Err(DbError::runtime(format!(
                        "unrecognized matchinfo request: {other}"
                    )))
                }
            }
        }
        Ok(words.into_iter().flat_map(u32::to_le_bytes).collect())
    }
}

fn saturate(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Blob(_) => None,
        other => other.to_text(),
    }
}

fn term_key(term: &str, rowid: RowId) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 9);
    key.extend_from_slice(term.as_bytes());
    key.push(0);
    key.extend_from_slice(&rowid_key(rowid));
    key
}

fn encode_positions(columns: &BTreeMap<usize, Vec<u32>>) -> Vec<u8> {
    let mut out = Vec::new();
    for (column, positions) in columns {
        put_varint(&mut out, *column as u64);
        put_varint(&mut out, positions.len() as u64);
        let mut prev = 0;
        for p in positions {
            put_varint(&mut out, u64::from(p - prev));
            prev = *p;
        }
    }
    out
}

fn decode_positions(data: &[u8], columns: usize, into: &mut ColumnPositions) -> DbResult<()> {
    let mut pos = 0;
    while pos < data.len() {
        let column = get_varint(data, &mut pos)? as usize;
        let count = get_varint(data, &mut pos)?;
        let slot = into
            .get_mut(column)
            .filter(|_| column < columns)
            .ok_or_else(|| DbError::malformed(format!("posting for column {column} out of range")))?;
        let mut prev = 0u32;
        for _ in 0..count {
            let delta = u32::try_from(get_varint(data, &mut pos)?)
                .map_err(|_| DbError::malformed("position delta out of range"))?;
            prev = prev
                .checked_add(delta)
                .ok_or_else(|| DbError::malformed("position out of range"))?;
            slot.push(prev);
        }
    }
    Ok(())
}

fn integers(values: &[Value]) -> DbResult<Vec<u64>> {
    values
        .iter()
        .map(|v| match v {
            Value::Integer(i) => u64::try_from(*i).map_err(|_| DbError::malformed("negative count")),
            _ => Err(DbError::malformed("full-text statistics are not integers")),
        })
        .collect()
}

impl FtsIndex {
    /// Binds a table's trees to its tokenizer.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        roots: FtsRoots,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            roots,
            tokenizer,
        }
    }

    /// Creates the trees of a new table.
    pub fn create_trees<W: PageWrite + ?Sized>(tx: &mut W) -> DbResult<FtsRoots> {
        Ok(FtsRoots {
            content: btree::create(tx)?,
            terms: btree::create(tx)?,
            docsize: btree::create(tx)?,
        })
    }

    /// Frees every page of the table.
    pub fn destroy<W: PageWrite + ?Sized>(&self, tx: &mut W) -> DbResult<()> {
        btree::destroy(tx, self.roots.content)?;
        btree::destroy(tx, self.roots.terms)?;
        btree::destroy(tx, self.roots.docsize)
    }

    /// Root pages.
    #[must_use]
    pub fn roots(&self) -> FtsRoots {
        self.roots
    }

    /// User column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn stats<P: PageRead + ?Sized>(&self, view: &P) -> DbResult<(u64, Vec<u64>)> {
        let Some(raw) = btree::get(view, self.roots.terms, STATS_KEY)? else {
            return Ok((0, vec![0; self.columns.len()]));
        };
        let mut values = integers(&decode_record(&raw)?)?;
        if values.len() != self.columns.len() + 1 {
            return Err(DbError::malformed("full-text statistics have the wrong arity"));
        }
        let docs = values.remove(0);
        Ok((docs, values))
    }

    fn adjust_stats<W: PageWrite + ?Sized>(&self, tx: &mut W, lengths: &[u64], added: bool) -> DbResult<()> {
        let (mut docs, mut totals) = self.stats(tx)?;
        if added {
            docs += 1;
            for (total, len) in totals.iter_mut().zip(lengths) {
                *total += len;
            }
        } else {
            docs = docs.saturating_sub(1);
            for (total, len) in totals.iter_mut().zip(lengths) {
                *total = total.saturating_sub(*len);
            }
        }
        let mut record = vec![Value::Integer(docs as i64)];
        record.extend(totals.iter().map(|t| Value::Integer(*t as i64)));
        btree::insert(tx, self.roots.terms, STATS_KEY, &encode_record(&record))
    }

    /// Term occurrences of a document, keyed by term then column.
    fn postings(&self, values: &[Value]) -> (BTreeMap<String, BTreeMap<usize, Vec<u32>>>, Vec<u64>) {
        let mut terms: BTreeMap<String, BTreeMap<usize, Vec<u32>>> = BTreeMap::new();
        let mut lengths = vec![0u64; self.columns.len()];
        for (column, value) in values.iter().enumerate().take(self.columns.len()) {
            let Some(text) = text_of(value) else { continue };
            let tokens = self.tokenizer.tokenize(&text);
            lengths[column] = tokens.len() as u64;
            for token in tokens {
                terms
                    .entry(token.term)
                    .or_default()
                    .entry(column)
                    .or_default()
                    .push(token.position as u32);
            }
        }
        (terms, lengths)
    }

    /// Returns true if a row with `rowid` exists.
    pub fn contains<P: PageRead + ?Sized>(&self, view: &P, rowid: RowId) -> DbResult<bool> {
        Ok(btree::get(view, self.roots.content, &rowid_key(rowid))?.is_some())
    }

    /// Indexes a new row and returns its row id.
    pub fn insert<W: PageWrite + ?Sized>(
        &self,
        tx: &mut W,
        rowid: Option<RowId>,
        mut values: Vec<Value>,
    ) -> DbResult<RowId> {
        let rowid = match rowid {
            Some(id) => id,
            None => btree::next_rowid(tx, self.roots.content)?,
        };
        if self.contains(tx, rowid)? {
            return Err(DbError::constraint(format!(
                "UNIQUE constraint failed: {}.rowid",
                self.name
            )));
        }
        values.resize(self.columns.len(), Value::Null);
        let (terms, lengths) = self.postings(&values);
        for (term, columns) in &terms {
            btree::insert(tx, self.roots.terms, &term_key(term, rowid), &encode_positions(columns))?;
        }
        let sizes: Vec<Value> = lengths.iter().map(|l| Value::Integer(*l as i64)).collect();
        btree::insert(tx, self.roots.docsize, &rowid_key(rowid), &encode_record(&sizes))?;
        btree::insert(tx, self.roots.content, &rowid_key(rowid), &encode_record(&values))?;
        self.adjust_stats(tx, &lengths, true)?;
        Ok(rowid)
    }

    /// Removes a row and its postings. Returns false if there was no such row.
    pub fn delete<W: PageWrite + ?Sized>(&self, tx: &mut W, rowid: RowId) -> DbResult<bool> {
        let Some(values) = self.get(tx, rowid)? else {
            return Ok(false);
        };
        let (terms, lengths) = self.postings(&values);
        for term in terms.keys() {
            btree::delete(tx, self.roots.terms, &term_key(term, rowid))?;
        }
        btree::delete(tx, self.roots.docsize, &rowid_key(rowid))?;
        btree::delete(tx, self.roots.content, &rowid_key(rowid))?;
        self.adjust_stats(tx, &lengths, false)?;
        Ok(true)
    }

    /// Column values of a row.
    pub fn get<P: PageRead + ?Sized>(&self, view: &P, rowid: RowId) -> DbResult<Option<Vec<Value>>> {
        btree::get(view, self.roots.content, &rowid_key(rowid))?
            .map(|raw| self.decode_row(&raw))
            .transpose()
    }

    fn decode_row(&self, raw: &[u8]) -> DbResult<Vec<Value>> {
        let mut values = decode_record(raw)?;
        values.resize(self.columns.len(), Value::Null);
        Ok(values)
    }

    /// Every row in row id order.
    pub fn scan<P: PageRead + ?Sized>(&self, view: &P) -> DbResult<Vec<(RowId, Vec<Value>)>> {
        let mut cursor = Cursor::new(view, self.roots.content);
        cursor.first()?;
        let mut rows = Vec::new();
        while let Some(key) = cursor.key() {
            let rowid = rowid_from_key(key).ok_or_else(|| DbError::malformed("row key is not 8 bytes"))?;
            rows.push((rowid, self.decode_row(&cursor.value()?)?));
            cursor.next()?;
        }
        Ok(rows)
    }

    /// Removes every row.
    pub fn clear<W: PageWrite + ?Sized>(&self, tx: &mut W) -> DbResult<u64> {
        let rows = btree::count(tx, self.roots.content)?;
        btree::clear(tx, self.roots.content)?;
        btree::clear(tx, self.roots.terms)?;
        btree::clear(tx, self.roots.docsize)?;
        Ok(rows)
    }

    /// Positions of a term (or of every term with a prefix) per row.
    fn term_postings<P: PageRead + ?Sized>(
        &self,
        view: &P,
        term: &QueryTerm,
    ) -> DbResult<BTreeMap<RowId, ColumnPositions>> {
        let mut prefix = term.term.as_bytes().to_vec();
        if !term.prefix {
            prefix.push(0);
        }
        let mut out: BTreeMap<RowId, ColumnPositions> = BTreeMap::new();
        let mut cursor = Cursor::new(view, self.roots.terms);
        cursor.seek(&prefix)?;
        while let Some(key) = cursor.key() {
            if !key.starts_with(&prefix) {
                break;
            }
            let split = key
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| DbError::malformed("term key without separator"))?;
            let rowid = rowid_from_key(&key[split + 1..])
                .ok_or_else(|| DbError::malformed("term key with a bad row id"))?;
            let entry = out
                .entry(rowid)
                .or_insert_with(|| vec![Vec::new(); self.columns.len()]);
            decode_positions(&cursor.value()?, self.columns.len(), entry)?;
            cursor.next()?;
        }
        if term.prefix {
            for columns in out.values_mut() {
                for positions in columns {
                    positions.sort_unstable();
                    positions.dedup();
                }
            }
        }
        Ok(out)
    }

    /// Hits per column of a phrase, for every row containing it.
    fn phrase_hits<P: PageRead + ?Sized>(&self, view: &P, phrase: &Phrase) -> DbResult<BTreeMap<RowId, Vec<u32>>> {
        let lists = phrase
            .terms
            .iter()
            .map(|t| self.term_postings(view, t))
            .collect::<DbResult<Vec<_>>>()?;
        let mut out = BTreeMap::new();
        let Some((first, rest)) = lists.split_first() else {
            return Ok(out);
        };
        for (rowid, leading) in first {
            let Some(following) = rest.iter().map(|l| l.get(rowid)).collect::<Option<Vec<_>>>() else {
                continue;
            };
            let mut counts = vec![0u32; self.columns.len()];
            for (column, count) in counts.iter_mut().enumerate() {
                if phrase.column.is_some_and(|c| c != column) {
                    continue;
                }
                *count = leading[column]
                    .iter()
                    .filter(|&&p| {
                        following.iter().enumerate().all(|(i, positions)| {
                            positions[column].binary_search(&(p + i as u32 + 1)).is_ok()
                        })
                    })
                    .count() as u32;
            }
            if counts.iter().any(|c| *c > 0) {
                out.insert(*rowid, counts);
            }
        }
        Ok(out)
    }

    /// Runs a full-text query. `column` restricts phrases without their own
    /// column filter. Rows come back in row id order.
    pub fn search<P: PageRead + ?Sized>(
        &self,
        view: &P,
        text: &str,
        column: Option<usize>,
    ) -> DbResult<Vec<FtsHit>> {
        let query = parse_query(text, &self.columns, column, self.tokenizer.as_ref())?;
        let Some(expr) = &query.expr else {
            return Ok(Vec::new());
        };
        let hits = query
            .phrases
            .iter()
            .map(|p| self.phrase_hits(view, p))
            .collect::<DbResult<Vec<_>>>()?;
        let rows = evaluate(expr, &hits);

        let ncols = self.columns.len();
        let mut global = vec![[0u32; 2]; hits.len() * ncols];
        for (phrase, per_row) in hits.iter().enumerate() {
            for counts in per_row.values() {
                for (column, count) in counts.iter().enumerate() {
                    let slot = &mut global[phrase * ncols + column];
                    slot[0] = slot[0].saturating_add(*count);
                    slot[1] += u32::from(*count > 0);
                }
            }
        }
        let (doc_count, column_totals) = self.stats(view)?;
        let stats = Arc::new(QueryStats {
            phrases: hits.len(),
            columns: ncols,
            doc_count,
            column_totals,
            global,
        });

        let mut out = Vec::with_capacity(rows.len());
        for rowid in rows {
            let values = self
                .get(view, rowid)?
                .ok_or_else(|| DbError::malformed(format!("posting for missing row {rowid}")))?;
            let lengths = match btree::get(view, self.roots.docsize, &rowid_key(rowid))? {
                Some(raw) => integers(&decode_record(&raw)?)?,
                None => vec![0; ncols],
            };
            let row_hits = hits
                .iter()
                .flat_map(|per_row| match per_row.get(&rowid) {
                    Some(counts) => counts.clone(),
                    None => vec![0; ncols],
                })
                .collect();
            out.push(FtsHit {
                rowid,
                values,
                stats: Arc::clone(&stats),
                row_hits,
                lengths,
            });
        }
        Ok(out)
    }
}

fn evaluate(expr: &QueryExpr, hits: &[BTreeMap<RowId, Vec<u32>>]) -> BTreeSet<RowId> {
    match expr {
        QueryExpr::Phrase(i) => hits.get(*i).map(|h| h.keys().copied().collect()).unwrap_or_default(),
        QueryExpr::And(l, r) => {
            let right = evaluate(r, hits);
            evaluate(l, hits).intersection(&right).copied().collect()
        }
        QueryExpr::Or(l, r) => {
            let mut left = evaluate(l, hits);
            left.extend(evaluate(r, hits));
            left
        }
        QueryExpr::Not(l, r) => {
            let right = evaluate(r, hits);
            evaluate(l, hits).difference(&right).copied().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fts::rank::{FtsRank, MatchInfo, RankFn};
    use crate::fts::stemmer::Language;
    use crate::fts::tokenizer::{BuiltinTokenizer, TokenizerKind};
    use crate::pager::{Pager, WriteTxn};

    fn setup(kind: TokenizerKind, language: Option<Language>, columns: &[&str]) -> (WriteTxn, FtsIndex) {
        let pager = Arc::new(Pager::open(None, None, &Config::default()).unwrap());
        let mut tx = pager.begin_write();
        let roots = FtsIndex::create_trees(&mut tx).unwrap();
        let index = FtsIndex::new(
            "docs",
            columns.iter().map(|c| c.to_string()).collect(),
            roots,
            Arc::new(BuiltinTokenizer::new(kind, language)),
        );
        (tx, index)
    }

    fn text(values: &[&str]) -> Vec<Value> {
        values.iter().map(|v| Value::from(*v)).collect()
    }

    fn rowids(hits: &[FtsHit]) -> Vec<RowId> {
        hits.iter().map(|h| h.rowid).collect()
    }

    #[test]
    fn boolean_queries() {
        let (mut tx, index) = setup(TokenizerKind::Simple, None, &["body"]);
        index.insert(&mut tx, None, text(&["apple banana"])).unwrap();
        index.insert(&mut tx, None, text(&["banana cherry"])).unwrap();
        index.insert(&mut tx, None, text(&["cherry apple pie"])).unwrap();

        assert_eq!(rowids(&index.search(&tx, "apple", None).unwrap()), vec![1, 3]);
        assert_eq!(rowids(&index.search(&tx, "apple banana", None).unwrap()), vec![1]);
        assert_eq!(rowids(&index.search(&tx, "apple OR cherry", None).unwrap()), vec![1, 2, 3]);
        assert_eq!(rowids(&index.search(&tx, "banana NOT apple", None).unwrap()), vec![2]);
        assert_eq!(rowids(&index.search(&tx, "\"apple pie\"", None).unwrap()), vec![3]);
        assert_eq!(rowids(&index.search(&tx, "\"pie apple\"", None).unwrap()), Vec::<RowId>::new());
        assert_eq!(rowids(&index.search(&tx, "ch*", None).unwrap()), vec![2, 3]);
    }

    #[test]
    fn column_filters() {
        let (mut tx, index) = setup(TokenizerKind::Simple, None, &["title", "body"]);
        index.insert(&mut tx, None, text(&["rust", "go"])).unwrap();
        index.insert(&mut tx, None, text(&["go", "rust"])).unwrap();
        assert_eq!(rowids(&index.search(&tx, "title:rust", None).unwrap()), vec![1]);
        assert_eq!(rowids(&index.search(&tx, "rust", Some(1)).unwrap()), vec![2]);
        assert_eq!(rowids(&index.search(&tx, "rust", None).unwrap()), vec![1, 2]);
    }

    #[test]
    fn delete_removes_postings_and_statistics() {
        let (mut tx, index) = setup(TokenizerKind::Simple, None, &["body"]);
        let a = index.insert(&mut tx, None, text(&["one two"])).unwrap();
        let b = index.insert(&mut tx, None, text(&["two three"])).unwrap();
        assert!(index.delete(&mut tx, a).unwrap());
        assert!(!index.delete(&mut tx, a).unwrap());
        assert!(index.search(&tx, "one", None).unwrap().is_empty());
        let hits = index.search(&tx, "two", None).unwrap();
        assert_eq!(rowids(&hits), vec![b]);
        assert_eq!(hits[0].matchinfo("na").unwrap(), [1u32, 2].iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_rowid_is_a_constraint_error() {
        let (mut tx, index) = setup(TokenizerKind::Simple, None, &["body"]);
        index.insert(&mut tx, Some(5), text(&["x"])).unwrap();
        let err = index.insert(&mut tx, Some(5), text(&["y"])).unwrap_err();
        assert!(matches!(err, DbError::Constraint { .. }));
        assert_eq!(index.insert(&mut tx, None, text(&["z"])).unwrap(), 6);
    }

    #[test]
    fn html_rank_prefers_concentrated_hits() {
        let (mut tx, index) = setup(TokenizerKind::Html, Some(Language::English), &["name", "description"]);
        index
            .insert(&mut tx, None, text(&["Boss", "<html> Bob Boss Unites Jobs Boss </html>"]))
            .unwrap();
        index
            .insert(&mut tx, None, text(&["Boss", "<html> Adrenaline Junkies </html>"]))
            .unwrap();
        index
            .insert(&mut tx, None, text(&["Alice", "<html><b>Boss</b> of nobody</html>"]))
            .unwrap();

        let hits = index.search(&tx, "boss", None).unwrap();
        assert_eq!(rowids(&hits), vec![1, 2, 3]);
        let scores: Vec<f64> = hits
            .iter()
            .map(|h| FtsRank.score(&MatchInfo::from_blob(&h.matchinfo("pcx").unwrap()).unwrap(), &[1.0, 0.5]))
            .collect();
        assert!((scores[0] - (0.5 + 2.0 / 3.0 * 0.5)).abs() < 1e-9);
        assert!((scores[1] - 0.5).abs() < 1e-9);
        assert!(scores[0] > scores[1] && scores[1] > scores[2]);

        assert!(index.search(&tx, "html", None).unwrap().is_empty());
        assert_eq!(rowids(&index.search(&tx, "unite", None).unwrap()), vec![1]);
    }

    #[test]
    fn matchinfo_lengths_and_averages() {
        let (mut tx, index) = setup(TokenizerKind::Simple, None, &["a", "b"]);
        index.insert(&mut tx, None, text(&["x y z", "x"])).unwrap();
        index.insert(&mut tx, None, text(&["y", "q r"])).unwrap();
        let hits = index.search(&tx, "x", None).unwrap();
        let words: Vec<u32> = hits[0]
            .matchinfo("pcnal")
            .unwrap()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![1, 2, 2, 2, 1, 3, 1]);
        assert!(hits[0].matchinfo("q").is_err());
    }
}
