//! Ranking functions over `matchinfo` statistics.

use crate::error::{DbError, DbResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Per-phrase, per-column hit statistics decoded from a `matchinfo(t, 'pcx')`
/// blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    phrases: usize,
    columns: usize,
    hits: Vec<[u32; 3]>,
}

impl MatchInfo {
    /// Decodes the default `pcx` layout: phrase count, column count, then
    /// three little-endian `u32` per phrase and column.
    pub fn from_blob(blob: &[u8]) -> DbResult<Self> {
        let words: Vec<u32> = blob
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let bad = || DbError::runtime("wrong number of values in matchinfo blob");
        if blob.len() % 4 != 0 || words.len() < 2 {
            return Err(bad());
        }
        let (phrases, columns) = (words[0] as usize, words[1] as usize);
        let expected = phrases
            .checked_mul(columns)
            .and_then(|cells| cells.checked_mul(3))
            .and_then(|values| values.checked_add(2));
        if expected != Some(words.len()) {
            return Err(bad());
        }
        let hits = words[2..]
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        Ok(Self {
            phrases,
            columns,
            hits,
        })
    }

    /// Number of phrases in the query.
    #[must_use]
    pub fn phrase_count(&self) -> usize {
        self.phrases
    }

    /// Number of user columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns
    }

    /// Hits of `phrase` in `column` of the current row.
    #[must_use]
    pub fn hits_this_row(&self, phrase: usize, column: usize) -> u32 {
        self.get(phrase, column)[0]
    }

    /// Hits of `phrase` in `column` across all rows.
    #[must_use]
    pub fn hits_all_rows(&self, phrase: usize, column: usize) -> u32 {
        self.get(phrase, column)[1]
    }

    /// Rows with at least one hit of `phrase` in `column`.
    #[must_use]
    pub fn docs_with_hits(&self, phrase: usize, column: usize) -> u32 {
        self.get(phrase, column)[2]
    }

    fn get(&self, phrase: usize, column: usize) -> [u32; 3] {
        self.hits
            .get(phrase * self.columns + column)
            .copied()
            .unwrap_or_default()
    }
}

/// A ranking function callable from SQL as `name(matchinfo(t), w0, w1, ...)`.
pub trait RankFn: Send + Sync {
    /// Scores one row. `weights` holds the numeric arguments after the
    /// matchinfo blob.
    fn score(&self, info: &MatchInfo, weights: &[f64]) -> f64;
}

impl<F> RankFn for F
where
    F: Fn(&MatchInfo, &[f64]) -> f64 + Send + Sync,
{
    fn score(&self, info: &MatchInfo, weights: &[f64]) -> f64 {
        self(info, weights)
    }
}

/// The built-in `ftsrank`: for every phrase and column, the share of the
/// phrase's hits in that column that fall in this row, times the column
/// weight (1.0 when not given).
#[derive(Debug, Clone, Copy, Default)]
pub struct FtsRank;

impl RankFn for FtsRank {
    fn score(&self, info: &MatchInfo, weights: &[f64]) -> f64 {
        let mut score = 0.0;
        for phrase in 0..info.phrase_count() {
            for column in 0..info.column_count() {
                let all = info.hits_all_rows(phrase, column);
                if all > 0 {
                    let weight = weights.get(column).copied().unwrap_or(1.0);
                    score += f64::from(info.hits_this_row(phrase, column)) / f64::from(all) * weight;
                }
            }
        }
        score
    }
}

/// Name of the built-in rank function.
pub const FTSRANK: &str = "ftsrank";

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn RankFn>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn RankFn>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(FTSRANK.to_string(), Arc::new(FtsRank) as Arc<dyn RankFn>);
        RwLock::new(map)
    })
}

/// Registers a rank function for use in SQL. Replaces an existing function
/// of the same name, including `ftsrank`.
pub fn register_rank_function(name: &str, function: Arc<dyn RankFn>) -> DbResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DbError::misuse(format!("invalid rank function name \"{name}\"")));
    }
    registry()
        .write()
        .insert(name.to_ascii_lowercase(), function);
    Ok(())
}

/// Looks up a rank function by (case-insensitive) name.
#[must_use]
pub fn rank_function(name: &str) -> Option<Arc<dyn RankFn>> {
    registry()
        .read()
        .get(&name.to_ascii_lowercase())
        .map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_pcx() {
        let info = MatchInfo::from_blob(&blob(&[1, 2, 1, 2, 2, 2, 3, 2])).unwrap();
        assert_eq!(info.phrase_count(), 1);
        assert_eq!(info.column_count(), 2);
        assert_eq!(info.hits_this_row(0, 1), 2);
        assert_eq!(info.hits_all_rows(0, 1), 3);
        assert_eq!(info.docs_with_hits(0, 0), 2);
    }

    #[test]
    fn rejects_other_layouts() {
        assert!(MatchInfo::from_blob(&blob(&[1, 2, 1])).is_err());
        assert!(MatchInfo::from_blob(&[1, 2, 3]).is_err());
        assert!(MatchInfo::from_blob(&[0xFF; 8]).is_err());
        assert!(MatchInfo::from_blob(&blob(&[u32::MAX, u32::MAX, 0, 0, 0])).is_err());
    }

    #[test]
    fn ftsrank_weighs_hit_shares() {
        let info = MatchInfo::from_blob(&blob(&[1, 2, 1, 2, 2, 2, 3, 2])).unwrap();
        let score = FtsRank.score(&info, &[1.0, 0.5]);
        assert!((score - (0.5 + 2.0 / 3.0 * 0.5)).abs() < 1e-9);
        let unweighted = FtsRank.score(&info, &[]);
        assert!((unweighted - (0.5 + 2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn custom_functions_register() {
        register_rank_function("hitcount", Arc::new(|info: &MatchInfo, _: &[f64]| {
            f64::from(info.hits_this_row(0, 0))
        }))
        .unwrap();
        assert!(rank_function("HITCOUNT").is_some());
        assert!(rank_function("ftsrank").is_some());
        assert!(register_rank_function("bad name", Arc::new(FtsRank)).is_err());
    }
}
