//! Process-wide tokenizer registry.
//!
//! `CREATE VIRTUAL TABLE ... USING fts4(..., tokenize=<name> [args])` only
//! accepts names registered here. The chosen name and stemmer language are
//! persisted in the schema, so reopening a table rebuilds the same tokenizer
//! without consulting the caller again. Built-in families are rebuilt even
//! if this process never registered them; custom tokenizers must be
//! registered before a table that uses them is opened.

use super::stemmer::Language;
use super::tokenizer::{BuiltinTokenizer, Tokenizer, TokenizerKind};
use crate::error::{DbError, DbResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Tokenizer bound to the table when none is named.
pub const DEFAULT_TOKENIZER: &str = "simple";

#[derive(Clone)]
enum Registered {
    Builtin {
        kind: TokenizerKind,
        language: Option<Language>,
    },
    Custom(Arc<dyn Tokenizer>),
}

fn registry() -> &'static RwLock<HashMap<String, Registered>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Registered>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for kind in [TokenizerKind::Simple, TokenizerKind::Porter, TokenizerKind::Unicode61] {
            map.insert(
                kind.name().to_ascii_lowercase(),
                Registered::Builtin {
                    kind,
                    language: None,
                },
            );
        }
        RwLock::new(map)
    })
}

/// Registers the built-in tokenizer `name` with an optional default stemmer
/// language (`"en"`, `"spa"`, `"german"`, ...).
///
/// Registering again replaces the default language. Tables created earlier
/// keep the language they were created with.
pub fn register_tokenizer(name: &str, language: Option<&str>) -> DbResult<()> {
    let kind = TokenizerKind::from_name(name)
        .ok_or_else(|| DbError::misuse(format!("no built-in tokenizer named \"{name}\"")))?;
    let language = language.map(str::parse::<Language>).transpose()?;
    debug!(tokenizer = kind.name(), ?language, "tokenizer registered");
    registry().write().insert(
        name.to_ascii_lowercase(),
        Registered::Builtin { kind, language },
    );
    Ok(())
}

/// Registers a caller-supplied tokenizer under `name`.
pub fn register_custom_tokenizer(name: &str, tokenizer: Arc<dyn Tokenizer>) -> DbResult<()> {
    if name.is_empty() {
        return Err(DbError::misuse("tokenizer name must not be empty"));
    }
    registry()
        .write()
        .insert(name.to_ascii_lowercase(), Registered::Custom(tokenizer));
    debug!(tokenizer = name, "custom tokenizer registered");
    Ok(())
}

/// Returns true if `name` can be used in `CREATE VIRTUAL TABLE`.
#[must_use]
pub fn is_registered(name: &str) -> bool {
    registry().read().contains_key(&name.to_ascii_lowercase())
}

/// Tokenizer choice persisted with an FTS table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerSpec {
    /// Registered name.
    pub name: String,
    /// Stemmer language fixed at creation.
    pub language: Option<Language>,
}

impl TokenizerSpec {
    /// Resolves `tokenize=<name> [args]` for a new table.
    ///
    /// Arguments of the form `stemmer=<lang>`, `language=<lang>`, or a bare
    /// language tag override the registered default language.
    pub fn resolve(name: Option<&str>, args: &[String]) -> DbResult<Self> {
        let name = name.unwrap_or(DEFAULT_TOKENIZER);
        let registered = registry()
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DbError::compile(format!("unknown tokenizer: {name}")))?;

        let mut language = None;
        for arg in args {
            let value = match arg.split_once('=') {
                Some((key, value))
                    if key.eq_ignore_ascii_case("stemmer") || key.eq_ignore_ascii_case("language") =>
                {
                    value
                }
                Some((key, _)) => {
                    return Err(DbError::compile(format!(
                        "unrecognized tokenizer argument: {key}"
                    )))
                }
                None => arg.as_str(),
            };
            let value = value.trim_matches(|c| c == '"' || c == '\'');
            language = Some(
                value
                    .parse::<Language>()
                    .map_err(|_| DbError::compile(format!("no stemmer for language: {value}")))?,
            );
        }

        match registered {
            Registered::Builtin {
                kind,
                language: default,
            } => Ok(Self {
                name: kind.name().to_string(),
                language: language.or(default),
            }),
            Registered::Custom(_) => Ok(Self {
                name: name.to_string(),
                language: None,
            }),
        }
    }

    /// Builds the tokenizer this spec describes.
    pub fn instantiate(&self) -> DbResult<Arc<dyn Tokenizer>> {
        if let Some(Registered::Custom(tokenizer)) =
            registry().read().get(&self.name.to_ascii_lowercase())
        {
            return Ok(Arc::clone(tokenizer));
        }
        let kind = TokenizerKind::from_name(&self.name)
            .ok_or_else(|| DbError::runtime(format!("unknown tokenizer: {}", self.name)))?;
        Ok(Arc::new(BuiltinTokenizer::new(kind, self.language)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fts::tokenizer::Token;

    struct Upper;

    impl Tokenizer for Upper {
        fn tokenize(&self, text: &str) -> Vec<Token> {
            text.split(' ')
                .filter(|w| !w.is_empty())
                .enumerate()
                .map(|(position, w)| Token {
                    term: w.to_uppercase(),
                    offset: w.as_ptr() as usize - text.as_ptr() as usize,
                    len: w.len(),
                    position,
                })
                .collect()
        }
    }

    #[test]
    fn defaults_are_preregistered() {
        assert!(is_registered("simple"));
        assert!(is_registered("PORTER"));
        assert!(is_registered("unicode61"));
        assert!(TokenizerSpec::resolve(Some("nonesuch"), &[]).is_err());
    }

    #[test]
    fn stemmer_argument_overrides_registration() {
        register_tokenizer("unicodesn", Some("eng")).unwrap();
        let spec = TokenizerSpec::resolve(Some("unicodesn"), &["stemmer=spanish".into()]).unwrap();
        assert_eq!(spec.language, Some(Language::Spanish));
        let bare = TokenizerSpec::resolve(Some("unicodesn"), &["fr".into()]).unwrap();
        assert_eq!(bare.language, Some(Language::French));
        let default = TokenizerSpec::resolve(Some("unicodesn"), &[]).unwrap();
        assert_eq!(default.language, Some(Language::English));
    }

    #[test]
    fn bad_arguments_fail_to_compile() {
        let err = TokenizerSpec::resolve(Some("simple"), &["stemmer=klingon".into()]).unwrap_err();
        assert!(matches!(err, DbError::SqlCompile { .. }));
        assert!(register_tokenizer("icu", None).is_err());
    }

    #[test]
    fn custom_tokenizers_resolve_to_the_registered_instance() {
        register_custom_tokenizer("shouting", Arc::new(Upper)).unwrap();
        let spec = TokenizerSpec::resolve(Some("shouting"), &[]).unwrap();
        let tokenizer = spec.instantiate().unwrap();
        let terms: Vec<_> = tokenizer.tokenize("a b").into_iter().map(|t| t.term).collect();
        assert_eq!(terms, vec!["A", "B"]);
    }

    #[test]
    fn builtins_instantiate_without_registration() {
        let spec = TokenizerSpec {
            name: "character".into(),
            language: None,
        };
        assert_eq!(spec.instantiate().unwrap().tokenize("ab").len(), 2);
    }
}
