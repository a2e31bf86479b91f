//! Snowball stemmers and language tags.

use crate::error::{DbError, DbResult};
use rust_stemmers::Algorithm;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// A language with a Snowball stemmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Danish.
    Danish,
    /// Dutch.
    Dutch,
    /// English (Porter2).
    English,
    /// Finnish.
    Finnish,
    /// French.
    French,
    /// German.
    German,
    /// Hungarian.
    Hungarian,
    /// Italian.
    Italian,
    /// Norwegian.
    Norwegian,
    /// Portuguese.
    Portuguese,
    /// Romanian.
    Romanian,
    /// Russian.
    Russian,
    /// Spanish.
    Spanish,
    /// Swedish.
    Swedish,
    /// Turkish.
    Turkish,
}

/// Accepted spellings: ISO 639-1, ISO 639-2 (T and B), and the English name.
const TAGS: &[(Language, &[&str])] = &[
    (Language::Danish, &["da", "dan", "danish"]),
    (Language::Dutch, &["nl", "nld", "dut", "dutch"]),
    (Language::English, &["en", "eng", "english", "porter"]),
    (Language::Finnish, &["fi", "fin", "finnish"]),
    (Language::French, &["fr", "fra", "fre", "french"]),
    (Language::German, &["de", "deu", "ger", "german"]),
    (Language::Hungarian, &["hu", "hun", "hungarian"]),
    (Language::Italian, &["it", "ita", "italian"]),
    (Language::Norwegian, &["no", "nor", "nb", "nob", "norwegian"]),
    (Language::Portuguese, &["pt", "por", "portuguese"]),
    (Language::Romanian, &["ro", "ron", "rum", "romanian"]),
    (Language::Russian, &["ru", "rus", "russian"]),
    (Language::Spanish, &["es", "spa", "spanish"]),
    (Language::Swedish, &["sv", "swe", "swedish"]),
    (Language::Turkish, &["tr", "tur", "turkish"]),
];

impl Language {
    /// Canonical lowercase English name, as persisted in the schema.
    #[must_use]
    pub fn name(self) -> &'static str {
        TAGS.iter()
            .find(|(lang, _)| *lang == self)
            .and_then(|(_, tags)| tags.iter().rev().find(|t| t.len() > 3 && **t != "porter"))
            .copied()
            .unwrap_or("english")
    }

    fn algorithm(self) -> Algorithm {
        match self {
            Self::Danish => Algorithm::Danish,
            Self::Dutch => Algorithm::Dutch,
            Self::English => Algorithm::English,
            Self::Finnish => Algorithm::Finnish,
            Self::French => Algorithm::French,
            Self::German => Algorithm::German,
            Self::Hungarian => Algorithm::Hungarian,
            Self::Italian => Algorithm::Italian,
            Self::Norwegian => Algorithm::Norwegian,
            Self::Portuguese => Algorithm::Portuguese,
            Self::Romanian => Algorithm::Romanian,
            Self::Russian => Algorithm::Russian,
            Self::Spanish => Algorithm::Spanish,
            Self::Swedish => Algorithm::Swedish,
            Self::Turkish => Algorithm::Turkish,
        }
    }
}

impl FromStr for Language {
    type Err = DbError;

    fn from_str(tag: &str) -> DbResult<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        // Region subtags ("en-US", "pt_BR") select the base language.
        let base = tag.split(['-', '_']).next().unwrap_or_default();
        TAGS.iter()
            .find(|(_, tags)| tags.contains(&base))
            .map(|(lang, _)| *lang)
            .ok_or_else(|| DbError::misuse(format!("no stemmer for language \"{tag}\"")))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduces lowercase words to their stem.
pub struct Stemmer {
    language: Language,
    inner: rust_stemmers::Stemmer,
}

impl Stemmer {
    /// Creates the stemmer of `language`.
    #[must_use]
    pub fn new(language: Language) -> Self {
        Self {
            language,
            inner: rust_stemmers::Stemmer::create(language.algorithm()),
        }
    }

    /// Language of this stemmer.
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    /// Stems a lowercase word.
    #[must_use]
    pub fn stem<'a>(&self, word: &'a str) -> Cow<'a, str> {
        self.inner.stem(word)
    }
}

impl fmt::Debug for Stemmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stemmer").field("language", &self.language).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_in_all_spellings() {
        for tag in ["en", "eng", "English", "en-US", "porter"] {
            assert_eq!(tag.parse::<Language>().unwrap(), Language::English);
        }
        for tag in ["es", "spa", "spanish"] {
            assert_eq!(tag.parse::<Language>().unwrap(), Language::Spanish);
        }
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn canonical_names_round_trip() {
        for (lang, _) in TAGS {
            assert_eq!(lang.name().parse::<Language>().unwrap(), *lang);
        }
        assert_eq!(Language::Spanish.to_string(), "spanish");
    }

    #[test]
    fn english_stems_morphological_variants_together() {
        let stemmer = Stemmer::new(Language::English);
        assert_eq!(stemmer.stem("repentance"), stemmer.stem("repent"));
        assert_eq!(stemmer.stem("unites"), stemmer.stem("unite"));
    }

    #[test]
    fn spanish_and_english_disagree() {
        let spanish = Stemmer::new(Language::Spanish);
        assert_eq!(spanish.stem("arrepentimiento"), spanish.stem("arrepentirse"));
        let english = Stemmer::new(Language::English);
        assert_ne!(english.stem("arrepentimiento"), english.stem("arrepentirse"));
    }
}
