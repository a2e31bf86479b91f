//! Tokenizers.
//!
//! A tokenizer turns text into terms with byte offsets into the input and
//! sequential positions. The built-in implementations differ in which
//! characters form words and how words are normalized:
//!
//! | name            | word characters              | normalization                  |
//! |-----------------|------------------------------|--------------------------------|
//! | `simple`        | ASCII alphanumerics, non-ASCII | ASCII lowercase              |
//! | `porter`        | as `simple`                  | lowercase + English stemmer    |
//! | `unicode61`     | Unicode alphanumerics        | lowercase, diacritics removed  |
//! | `unicodesn`     | as `unicode61`               | + Snowball stemmer             |
//! | `HTMLTokenizer` | as `unicode61`, markup skipped | + optional stemmer           |
//! | `character`     | each alphanumeric character  | lowercase                      |
//!
//! Any of them accepts a stemmer language.

use super::stemmer::{Language, Stemmer};
use std::fmt;

/// Terms longer than this (in bytes) are not indexed.
pub const MAX_TERM_LEN: usize = 256;

/// A term produced by a tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Normalized term.
    pub term: String,
    /// Byte offset of the word in the input.
    pub offset: usize,
    /// Byte length of the word in the input.
    pub len: usize,
    /// Ordinal of the term within the input.
    pub position: usize,
}

/// Splits text into terms.
///
/// Implementations must be deterministic: the same text always yields the
/// same terms, since deletes re-tokenize stored documents.
pub trait Tokenizer: Send + Sync {
    /// Tokenizes `text`. Every token's `offset..offset + len` must be a
    /// valid byte range of `text`.
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

/// The built-in tokenizer families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenizerKind {
    /// ASCII word splitting.
    Simple,
    /// `simple` with an English stemmer.
    Porter,
    /// Unicode word splitting with case and diacritic folding.
    Unicode61,
    /// `unicode61` with a Snowball stemmer.
    UnicodeSn,
    /// `unicode61` over text with markup removed.
    Html,
    /// One term per character.
    Character,
}

const KINDS: &[(TokenizerKind, &str)] = &[
    (TokenizerKind::Simple, "simple"),
    (TokenizerKind::Porter, "porter"),
    (TokenizerKind::Unicode61, "unicode61"),
    (TokenizerKind::UnicodeSn, "unicodesn"),
    (TokenizerKind::Html, "HTMLTokenizer"),
    (TokenizerKind::Character, "character"),
];

impl TokenizerKind {
    /// Looks up a built-in by name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        KINDS
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(k, _)| *k)
    }

    /// Registered name.
    #[must_use]
    pub fn name(self) -> &'static str {
        KINDS
            .iter()
            .find(|(k, _)| *k == self)
            .map_or("simple", |(_, n)| n)
    }

    /// Stemmer language used when none is configured.
    #[must_use]
    pub fn default_language(self) -> Option<Language> {
        match self {
            Self::Porter | Self::UnicodeSn => Some(Language::English),
            _ => None,
        }
    }
}

/// One of the built-in tokenizers, optionally stemming.
pub struct BuiltinTokenizer {
    kind: TokenizerKind,
    stemmer: Option<Stemmer>,
}

impl fmt::Debug for BuiltinTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinTokenizer")
            .field("kind", &self.kind)
            .field("language", &self.language())
            .finish()
    }
}

impl BuiltinTokenizer {
    /// Creates a tokenizer of `kind`. `language` overrides the kind's
    /// default stemmer.
    #[must_use]
    pub fn new(kind: TokenizerKind, language: Option<Language>) -> Self {
        Self {
            kind,
            stemmer: language.or(kind.default_language()).map(Stemmer::new),
        }
    }

    /// Tokenizer family.
    #[must_use]
    pub fn kind(&self) -> TokenizerKind {
        self.kind
    }

    /// Stemmer language, if stemming.
    #[must_use]
    pub fn language(&self) -> Option<Language> {
        self.stemmer.as_ref().map(Stemmer::language)
    }

    fn push(&self, out: &mut Vec<Token>, word: &str, offset: usize) {
        let folded: String = match self.kind {
            TokenizerKind::Simple | TokenizerKind::Porter => word.to_ascii_lowercase(),
            _ => word.chars().flat_map(char::to_lowercase).map(fold_diacritic).collect(),
        };
        let term = match &self.stemmer {
            Some(stemmer) => stemmer.stem(&folded).into_owned(),
            None => folded,
        };
        if term.is_empty() || term.len() > MAX_TERM_LEN || term.contains('\0') {
            return;
        }
        out.push(Token {
            term,
            offset,
            len: word.len(),
            position: out.len(),
        });
    }

    fn is_word_char(&self, c: char) -> bool {
        match self.kind {
            TokenizerKind::Simple | TokenizerKind::Porter => c.is_ascii_alphanumeric() || !c.is_ascii(),
            _ => c.is_alphanumeric(),
        }
    }

    fn words(&self, text: &str, base: usize, out: &mut Vec<Token>) {
        if self.kind == TokenizerKind::Character {
            for (i, c) in text.char_indices() {
                if c.is_alphanumeric() {
                    self.push(out, &text[i..i + c.len_utf8()], base + i);
                }
            }
            return;
        }
        let mut start = None;
        for (i, c) in text.char_indices() {
            match (self.is_word_char(c), start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    self.push(out, &text[s..i], base + s);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            self.push(out, &text[s..], base + s);
        }
    }
}

impl Tokenizer for BuiltinTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut out = Vec::new();
        if self.kind == TokenizerKind::Html {
            for (start, end) in text_segments(text) {
                self.words(&text[start..end], start, &mut out);
            }
        } else {
            self.words(text, 0, &mut out);
        }
        out
    }
}

/// Byte ranges of `html` that lie outside tags, comments, entities, and
/// `script`/`style` elements.
fn text_segments(html: &str) -> Vec<(usize, usize)> {
    let bytes = html.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    let mut flush = |segments: &mut Vec<(usize, usize)>, from: usize, to: usize| {
        if to > from {
            segments.push((from, to));
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'<' if bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?')) =>
            {
                flush(&mut segments, start, i);
                i = if html[i..].starts_with("<!--") {
                    html[i + 4..].find("-->").map_or(bytes.len(), |p| i + 4 + p + 3)
                } else {
                    let end = tag_end(bytes, i);
                    let name = tag_name(&html[i + 1..end]);
                    if name == "script" || name == "style" {
                        skip_element(html, end, &name)
                    } else {
                        end
                    }
                };
                start = i;
            }
            b'&' => {
                let entity_len = bytes[i + 1..]
                    .iter()
                    .take(10)
                    .position(|b| *b == b';')
                    .filter(|len| {
                        *len > 0
                            && bytes[i + 1..i + 1 + len]
                                .iter()
                                .all(|b| b.is_ascii_alphanumeric() || *b == b'#')
                    });
                match entity_len {
                    Some(len) => {
                        flush(&mut segments, start, i);
                        i += len + 2;
                        start = i;
                    }
                    None => i += 1,
                }
            }
            _ => i += 1,
        }
    }
    flush(&mut segments, start, bytes.len());
    segments
}

/// Index just past the `>` closing the tag that starts at `start`, honoring
/// quoted attribute values.
fn tag_end(bytes: &[u8], start: usize) -> usize {
    let mut quote = None;
    for (i, b) in bytes.iter().enumerate().skip(start + 1) {
        match (quote, *b) {
            (None, b'"' | b'\'') => quote = Some(*b),
            (Some(q), b) if b == q => quote = None,
            (None, b'>') => return i + 1,
            _ => {}
        }
    }
    bytes.len()
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches(['/', '!', '?'])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Index past the closing tag of the element `name`, whose content starts at `from`.
fn skip_element(html: &str, from: usize, name: &str) -> usize {
    let closing = format!("</{name}");
    let lower = html[from..].to_ascii_lowercase();
    match lower.find(&closing) {
        Some(p) => tag_end(html.as_bytes(), from + p),
        None => html.len(),
    }
}

fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' => 'i',
        'ĺ' | 'ļ' | 'ľ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'ţ' | 'ť' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ý' | 'ÿ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(tokenizer: &dyn Tokenizer, text: &str) -> Vec<String> {
        tokenizer.tokenize(text).into_iter().map(|t| t.term).collect()
    }

    #[test]
    fn simple_splits_on_ascii_punctuation() {
        let t = BuiltinTokenizer::new(TokenizerKind::Simple, None);
        assert_eq!(terms(&t, "Hello, World! x2"), vec!["hello", "world", "x2"]);
    }

    #[test]
    fn offsets_and_positions_reference_input() {
        let t = BuiltinTokenizer::new(TokenizerKind::Unicode61, None);
        let text = "  Ünïcode wörds\u{1F601}here";
        let tokens = t.tokenize(text);
        assert_eq!(
            tokens.iter().map(|t| t.term.as_str()).collect::<Vec<_>>(),
            vec!["unicode", "words", "here"]
        );
        for (i, token) in tokens.iter().enumerate() {
            assert_eq!(token.position, i);
            assert!(text.get(token.offset..token.offset + token.len).is_some());
        }
        assert_eq!(&text[tokens[0].offset..tokens[0].offset + tokens[0].len], "Ünïcode");
    }

    #[test]
    fn html_skips_tags_attributes_and_scripts() {
        let t = BuiltinTokenizer::new(TokenizerKind::Html, None);
        let text = "<html><body class=\"main body\">Adrenaline <b>Junkies</b> \
                    <script>var hidden = 1;</script>Unite&amp;Win <!-- note --></body></html>";
        assert_eq!(
            terms(&t, text),
            vec!["adrenaline", "junkies", "unite", "win"]
        );
        for token in t.tokenize(text) {
            let word = &text[token.offset..token.offset + token.len];
            assert_eq!(word.to_lowercase(), token.term);
        }
    }

    #[test]
    fn html_keeps_a_bare_less_than() {
        let t = BuiltinTokenizer::new(TokenizerKind::Html, None);
        assert_eq!(terms(&t, "a < b"), vec!["a", "b"]);
    }

    #[test]
    fn stemming_applies_to_every_kind() {
        let t = BuiltinTokenizer::new(TokenizerKind::Html, Some(Language::English));
        assert_eq!(terms(&t, "<p>Bob Unites</p>"), vec!["bob", "unit"]);
        let porter = BuiltinTokenizer::new(TokenizerKind::Porter, None);
        assert_eq!(porter.language(), Some(Language::English));
        assert_eq!(terms(&porter, "REPENTANCE"), terms(&porter, "repent"));
    }

    #[test]
    fn character_tokenizer_emits_each_character() {
        let t = BuiltinTokenizer::new(TokenizerKind::Character, None);
        assert_eq!(terms(&t, "日本 A!"), vec!["日", "本", "a"]);
    }

    #[test]
    fn kind_names() {
        assert_eq!(TokenizerKind::from_name("htmltokenizer"), Some(TokenizerKind::Html));
        assert_eq!(TokenizerKind::Html.name(), "HTMLTokenizer");
        assert_eq!(TokenizerKind::from_name("icu"), None);
    }
}
