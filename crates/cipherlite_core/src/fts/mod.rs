//! Full-text search.
//!
//! Full-text tables are declared with
//! `CREATE VIRTUAL TABLE t USING fts4(col, ..., tokenize=<name> [args])`
//! and queried with `WHERE t MATCH '...'` (all columns) or
//! `WHERE col MATCH '...'` (one column). Relevance comes from
//! `matchinfo(t)` fed to a rank function such as `ftsrank`.

mod index;
mod query;
mod rank;
mod registry;
mod stemmer;
mod tokenizer;

pub use index::{FtsHit, FtsIndex, FtsRoots, QueryStats};
pub use query::{parse_query, Phrase, Query, QueryExpr, QueryTerm};
pub use rank::{rank_function, register_rank_function, FtsRank, MatchInfo, RankFn, FTSRANK};
pub use registry::{
    is_registered, register_custom_tokenizer, register_tokenizer, TokenizerSpec,
    DEFAULT_TOKENIZER,
};
pub use stemmer::{Language, Stemmer};
pub use tokenizer::{BuiltinTokenizer, Token, Tokenizer, TokenizerKind, MAX_TERM_LEN};

/// Module names accepted by `CREATE VIRTUAL TABLE ... USING`.
pub const MODULES: &[&str] = &["fts3", "fts4"];
