//! Pattern-driven tokenizer.
//!
//! A [`Tokenizer`] holds an ordered list of regular expressions. Scanning picks,
//! at every step, the match that starts first; when two patterns start at the
//! same offset the one listed first wins. Text between matches is reported as a
//! no-match token, so the produced tokens always tile the whole input.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Token kinds of the LaTeX pattern set, listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `%` up to and including the end of the line
    Comment,
    /// `\` followed by two or more letters, or by any single character
    Command,
    /// One or more `#` followed by a digit
    Parameter,
    LeftBrace,
    RightBrace,
    Whitespace,
}

/// The default LaTeX tokenizer.
///
/// Braces and whitespace preceded by a backslash never reach their own
/// patterns: the command pattern matches one byte earlier and claims them.
pub static LATEX: Lazy<Tokenizer<TokenKind>> = Lazy::new(|| {
    let pattern = |source: &str| Regex::new(source).expect("built-in token pattern is valid");
    Tokenizer::new([
        (TokenKind::Comment, pattern(r"%(.*\n?)")),
        (TokenKind::Command, pattern(r"\\([a-zA-Z@]{2,}|.)")),
        (TokenKind::Parameter, pattern(r"(#+)([0-9])")),
        (TokenKind::LeftBrace, pattern(r"\{")),
        (TokenKind::RightBrace, pattern(r"\}")),
        (TokenKind::Whitespace, pattern(r"\s+")),
    ])
});

/// A span of the source, either matched by a pattern or left over between matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'t, K> {
    kind: Option<K>,
    source: &'t str,
    span: Range<usize>,
    groups: Vec<Option<Range<usize>>>,
}

impl<'t, K: Copy> Token<'t, K> {
    fn no_match(source: &'t str, span: Range<usize>) -> Self {
        Self {
            kind: None,
            source,
            span,
            groups: Vec::new(),
        }
    }

    /// The pattern that produced this token, `None` for unmatched text.
    pub fn kind(&self) -> Option<K> {
        self.kind
    }

    pub fn start(&self) -> usize {
        self.span.start
    }

    pub fn end(&self) -> usize {
        self.span.end
    }

    pub fn as_str(&self) -> &'t str {
        &self.source[self.span.clone()]
    }

    /// Capture group `index` of the match, 1-based like [`regex::Captures`].
    pub fn group(&self, index: usize) -> Option<&'t str> {
        let span = self.groups.get(index.checked_sub(1)?)?.clone()?;
        Some(&self.source[span])
    }
}

/// An ordered set of patterns.
#[derive(Debug, Clone)]
pub struct Tokenizer<K> {
    patterns: Vec<(K, Regex)>,
}

impl<K: Copy> Tokenizer<K> {
    /// Earlier patterns win ties. Patterns that match the empty string are
    /// allowed but their empty matches are skipped.
    pub fn new(patterns: impl IntoIterator<Item = (K, Regex)>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    /// Lazily split `text` into tokens.
    pub fn tokenize<'t>(&self, text: &'t str) -> Tokens<'t, '_, K> {
        Tokens {
            text,
            cursors: self
                .patterns
                .iter()
                .map(|(kind, regex)| Cursor {
                    kind: *kind,
                    regex,
                    next: None,
                })
                .collect(),
            pos: 0,
            queued: None,
        }
    }
}

#[derive(Debug)]
struct Found {
    span: Range<usize>,
    groups: Vec<Option<Range<usize>>>,
}

impl Found {
    fn new(captures: &Captures<'_>) -> Option<Self> {
        let whole = captures.get(0)?;
        Some(Self {
            span: whole.range(),
            groups: captures.iter().skip(1).map(|m| m.map(|m| m.range())).collect(),
        })
    }
}

/// A pattern together with its next match at or after the scan position.
#[derive(Debug)]
struct Cursor<'p, K> {
    kind: K,
    regex: &'p Regex,
    next: Option<Found>,
}

impl<K> Cursor<'_, K> {
    fn search(&self, text: &str, from: usize) -> Option<Found> {
        let mut at = from;
        loop {
            let captures = self.regex.captures_at(text, at)?;
            let whole = captures.get(0)?;
            if !whole.is_empty() {
                return Found::new(&captures);
            }
            at = whole.end() + text[whole.end()..].chars().next()?.len_utf8();
        }
    }
}

/// Iterator returned by [`Tokenizer::tokenize`].
#[derive(Debug)]
pub struct Tokens<'t, 'p, K> {
    text: &'t str,
    cursors: Vec<Cursor<'p, K>>,
    pos: usize,
    queued: Option<Token<'t, K>>,
}

impl<K> Tokens<'_, '_, K> {
    /// Re-search only the patterns whose cached match fell behind the scan
    /// position, and forget the ones that have no match left.
    fn refresh(&mut self) {
        let (text, pos) = (self.text, self.pos);
        self.cursors.retain_mut(|cursor| {
            if cursor.next.as_ref().is_some_and(|found| found.span.start >= pos) {
                return true;
            }
            cursor.next = cursor.search(text, pos);
            cursor.next.is_some()
        });
    }
}

impl<'t, K: Copy> Iterator for Tokens<'t, '_, K> {
    type Item = Token<'t, K>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(token) = self.queued.take() {
            return Some(token);
        }
        if self.pos >= self.text.len() {
            return None;
        }

        self.refresh();
        let nearest = self
            .cursors
            .iter()
            .enumerate()
            .filter_map(|(i, cursor)| cursor.next.as_ref().map(|found| (found.span.start, i)))
            .min();

        let Some((start, index)) = nearest else {
            let rest = Token::no_match(self.text, self.pos..self.text.len());
            self.pos = self.text.len();
            return Some(rest);
        };

        let cursor = &mut self.cursors[index];
        let found = cursor.next.take()?;
        let token = Token {
            kind: Some(cursor.kind),
            source: self.text,
            span: found.span,
            groups: found.groups,
        };

        let gap = self.pos..start;
        self.pos = token.end();
        if gap.is_empty() {
            Some(token)
        } else {
            self.queued = Some(token);
            Some(Token::no_match(self.text, gap))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<(Option<TokenKind>, &str)> {
        LATEX
            .tokenize(text)
            .map(|token| (token.kind(), token.as_str()))
            .collect()
    }

    #[test]
    fn test_tokenize_mixed() {
        use TokenKind::*;
        assert_eq!(
            kinds("a \\foo{#1}% note\nb"),
            vec![
                (None, "a"),
                (Some(Whitespace), " "),
                (Some(Command), "\\foo"),
                (Some(LeftBrace), "{"),
                (Some(Parameter), "#1"),
                (Some(RightBrace), "}"),
                (Some(Comment), "% note\n"),
                (None, "b"),
            ]
        );
    }

    #[test]
    fn test_capture_groups() {
        let tokens: Vec<_> = LATEX.tokenize("###2\\x%c").collect();
        assert_eq!(tokens[0].group(1), Some("###"));
        assert_eq!(tokens[0].group(2), Some("2"));
        assert_eq!(tokens[1].group(1), Some("x"));
        assert_eq!(tokens[2].group(1), Some("c"));
        assert_eq!(tokens[2].group(0), None);
    }

    #[test]
    fn test_escaped_characters_are_commands() {
        use TokenKind::*;
        assert_eq!(
            kinds("\\{\\}\\ \\%"),
            vec![
                (Some(Command), "\\{"),
                (Some(Command), "\\}"),
                (Some(Command), "\\ "),
                (Some(Command), "\\%"),
            ]
        );
        assert_eq!(
            kinds("\\\\{"),
            vec![(Some(Command), "\\\\"), (Some(LeftBrace), "{")]
        );
    }

    #[test]
    fn test_single_letter_command_takes_one_character() {
        assert_eq!(kinds("\\a1")[0], (Some(TokenKind::Command), "\\a"));
        assert_eq!(kinds("\\ab1")[0], (Some(TokenKind::Command), "\\ab"));
    }

    #[test]
    fn test_tie_goes_to_first_pattern() {
        let tokenizer = Tokenizer::new([
            ("short", Regex::new("ab").unwrap()),
            ("long", Regex::new("abc").unwrap()),
        ]);
        let tokens: Vec<_> = tokenizer.tokenize("xabc").map(|t| (t.kind(), t.as_str())).collect();
        assert_eq!(tokens, vec![(None, "x"), (Some("short"), "ab"), (None, "c")]);
    }

    #[test]
    fn test_overlapping_match_is_researched() {
        let tokenizer = Tokenizer::new([
            ("ab", Regex::new("ab").unwrap()),
            ("bc", Regex::new("bc").unwrap()),
        ]);
        let tokens: Vec<_> = tokenizer.tokenize("abcbc").map(|t| (t.kind(), t.as_str())).collect();
        assert_eq!(tokens, vec![(Some("ab"), "ab"), (None, "c"), (Some("bc"), "bc")]);
    }

    #[test]
    fn test_empty_matches_are_skipped() {
        let tokenizer = Tokenizer::new([("digits", Regex::new("[0-9]*").unwrap())]);
        let tokens: Vec<_> = tokenizer.tokenize("ab12c").map(|t| (t.kind(), t.as_str())).collect();
        assert_eq!(tokens, vec![(None, "ab"), (Some("digits"), "12"), (None, "c")]);
    }

    #[test]
    fn test_tokens_tile_the_input() {
        let text = "\\section{Intro} % comment\n  text with #1 and {nested {groups}}\u{e9}\\";
        let mut next_start = 0;
        for token in LATEX.tokenize(text) {
            assert_eq!(token.start(), next_start);
            assert!(token.end() > token.start());
            next_start = token.end();
        }
        assert_eq!(next_start, text.len());
    }

    #[test]
    fn test_empty_input() {
        assert!(kinds("").is_empty());
    }
}
