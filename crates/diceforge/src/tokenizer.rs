// ABOUTME: Generic regex tokenizer shared by the dice parser, macro placeholders and annotator.
// ABOUTME: Emits the nearest match among named patterns, with "unknown" tokens for the gaps.

use regex::{Captures, Regex};

/// Key given to text that sits between (or after) recognized tokens.
pub const UNKNOWN: &str = "unknown";

/// A single token produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Name of the pattern that produced this token, or [`UNKNOWN`].
    pub key: &'static str,
    /// The full text matched by the pattern.
    pub matched: String,
    /// Capture groups 1..n of the pattern; `None` when a group did not participate.
    pub captures: Vec<Option<String>>,
}

impl Token {
    fn unknown(text: &str) -> Self {
        Self {
            key: UNKNOWN,
            matched: text.to_string(),
            captures: Vec::new(),
        }
    }

    fn from_captures(key: &'static str, caps: &Captures<'_>) -> Self {
        Self {
            key,
            matched: caps[0].to_string(),
            captures: caps
                .iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// Returns true if this token was produced by the pattern named `key`.
    pub fn is(&self, key: &str) -> bool {
        self.key == key
    }

    /// Returns capture group `index` (0-based, i.e. regex group `index + 1`) if it matched.
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(|c| c.as_deref())
    }

    /// Returns capture group `index` only if it matched non-empty text.
    pub fn non_empty(&self, index: usize) -> Option<&str> {
        self.capture(index).filter(|c| !c.is_empty())
    }
}

/// An ordered set of named patterns. Order breaks ties between matches
/// that start at the same position.
#[derive(Debug, Clone, Default)]
pub struct TokenParsers {
    parsers: Vec<(&'static str, Regex)>,
}

impl TokenParsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named pattern.
    pub fn with(mut self, key: &'static str, regex: Regex) -> Self {
        self.parsers.push((key, regex));
        self
    }

    /// Builds a parser set from `(name, pattern)` pairs.
    pub fn from_patterns(patterns: &[(&'static str, &str)]) -> Result<Self, regex::Error> {
        let mut parsers = Self::new();
        for (key, pattern) in patterns {
            parsers = parsers.with(key, Regex::new(pattern)?);
        }
        Ok(parsers)
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

/// Splits `input` into tokens.
///
/// At each step every pattern is searched from the cursor; the match with the
/// lowest start wins, earlier patterns winning ties. Text skipped over to reach
/// the winner becomes an [`UNKNOWN`] token. Empty matches are ignored so the
/// cursor always advances.
///
/// # Examples
///
/// ```
/// use diceforge::tokenizer::{tokenize, TokenParsers, UNKNOWN};
///
/// let parsers = TokenParsers::from_patterns(&[("num", r"\d+")]).unwrap();
/// let tokens = tokenize("ab12c", &parsers);
/// let keys: Vec<_> = tokens.iter().map(|t| t.key).collect();
/// assert_eq!(keys, vec![UNKNOWN, "num", UNKNOWN]);
/// ```
pub fn tokenize(input: &str, parsers: &TokenParsers) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let mut best: Option<(&'static str, Captures<'_>)> = None;
        for (key, regex) in &parsers.parsers {
            let Some(caps) = find_non_empty(regex, input, pos) else {
                continue;
            };
            let start = caps.get(0).map_or(usize::MAX, |m| m.start());
            let closer = best
                .as_ref()
                .and_then(|(_, b)| b.get(0))
                .map_or(true, |b| start < b.start());
            if closer {
                best = Some((*key, caps));
            }
        }

        let Some((key, caps)) = best else {
            tokens.push(Token::unknown(&input[pos..]));
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };

        if whole.start() > pos {
            tokens.push(Token::unknown(&input[pos..whole.start()]));
        }
        tokens.push(Token::from_captures(key, &caps));
        pos = whole.end();
    }

    tokens
}

/// Finds the first non-empty match of `regex` at or after `start`.
pub(crate) fn find_non_empty<'h>(regex: &Regex, haystack: &'h str, start: usize) -> Option<Captures<'h>> {
    let mut from = start;
    while from <= haystack.len() {
        let caps = regex.captures_at(haystack, from)?;
        let whole = caps.get(0)?;
        if !whole.is_empty() {
            return Some(caps);
        }
        from = next_boundary(haystack, whole.end());
    }
    None
}

/// Byte offset of the character boundary following `pos`.
pub(crate) fn next_boundary(text: &str, pos: usize) -> usize {
    text[pos..]
        .chars()
        .next()
        .map_or(text.len() + 1, |c| pos + c.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsers() -> TokenParsers {
        TokenParsers::from_patterns(&[
            ("dice", r"(\d*)d(\d+)"),
            ("num", r"\d+"),
            ("op", r"[-+]"),
        ])
        .unwrap()
    }

    fn keys(tokens: &[Token]) -> Vec<&'static str> {
        tokens.iter().map(|t| t.key).collect()
    }

    #[test]
    fn test_nearest_match_wins() {
        let tokens = tokenize("2d6+3", &parsers());
        assert_eq!(keys(&tokens), vec!["dice", "op", "num"]);
        assert_eq!(tokens[0].capture(0), Some("2"));
        assert_eq!(tokens[0].capture(1), Some("6"));
    }

    #[test]
    fn test_tie_goes_to_first_pattern() {
        // Both "dice" and "num" can start at 0; "dice" is listed first.
        let tokens = tokenize("4d8", &parsers());
        assert_eq!(keys(&tokens), vec!["dice"]);
    }

    #[test]
    fn test_unknown_gaps() {
        let tokens = tokenize("roll 2d6 fire", &parsers());
        assert_eq!(keys(&tokens), vec![UNKNOWN, "dice", UNKNOWN]);
        assert_eq!(tokens[0].matched, "roll ");
        assert_eq!(tokens[2].matched, " fire");
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("", &parsers()).is_empty());
    }

    #[test]
    fn test_no_patterns() {
        let tokens = tokenize("abc", &TokenParsers::new());
        assert_eq!(tokens, vec![Token::unknown("abc")]);
    }

    #[test]
    fn test_empty_matches_are_skipped() {
        let parsers = TokenParsers::from_patterns(&[("maybe", r"x*")]).unwrap();
        let tokens = tokenize("abxxc", &parsers);
        assert_eq!(keys(&tokens), vec![UNKNOWN, "maybe", UNKNOWN]);
        assert_eq!(tokens[1].matched, "xx");
    }

    #[test]
    fn test_multibyte_text() {
        let tokens = tokenize("🎲 1d20 ⚔", &parsers());
        assert_eq!(keys(&tokens), vec![UNKNOWN, "dice", UNKNOWN]);
        assert_eq!(tokens[0].matched, "🎲 ");
    }

    #[test]
    fn test_optional_group_is_none() {
        let parsers = TokenParsers::from_patterns(&[("sign", r"([-+])?(\d+)")]).unwrap();
        let tokens = tokenize("7", &parsers);
        assert_eq!(tokens[0].capture(0), None);
        assert_eq!(tokens[0].capture(1), Some("7"));
    }
}
