use std::io::Read;

use log::debug;

use crate::ast::{Group, Node, Parameter};
use crate::error::{Error, Result};
use crate::tokenizer::{LATEX, Token, TokenKind, Tokenizer};

/// Builds a document tree from either source text or a reader.
///
/// ```
/// let root = astex::Parser::new().text("\\emph{hi}").parse().unwrap();
/// assert_eq!(root.to_string(), "\\emph{hi}");
/// ```
pub struct Parser<'a> {
    text: Option<&'a str>,
    reader: Option<Box<dyn Read + 'a>>,
    tokenizer: &'a Tokenizer<TokenKind>,
}

impl Default for Parser<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Parser<'a> {
    pub fn new() -> Self {
        Self {
            text: None,
            reader: None,
            tokenizer: &LATEX,
        }
    }

    pub fn text(mut self, text: &'a str) -> Self {
        self.text = Some(text);
        self
    }

    pub fn reader(mut self, reader: impl Read + 'a) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Use another pattern set. It must report the same [`TokenKind`]s, with
    /// the payload in capture group 1 for comments and commands.
    pub fn tokenizer(mut self, tokenizer: &'a Tokenizer<TokenKind>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Parse the configured source into a root group.
    ///
    /// Exactly one of [`text`](Self::text) and [`reader`](Self::reader) must
    /// have been given. A stray `}` fails. Groups still open at the end of
    /// the input are closed as brackets, so the tree prints with the missing
    /// `}`s appended: `a{b{c` comes back as `a{b{c}}`.
    pub fn parse(self) -> Result<Group> {
        match (self.text, self.reader) {
            (Some(text), None) => build(self.tokenizer, text),
            (None, Some(mut reader)) => {
                let mut text = String::new();
                reader.read_to_string(&mut text)?;
                build(self.tokenizer, &text)
            }
            _ => Err(Error::InvalidInput),
        }
    }
}

/// Parse source text with the default tokenizer.
pub fn parse(text: &str) -> Result<Group> {
    Parser::new().text(text).parse()
}

/// Parse everything `reader` yields with the default tokenizer.
pub fn parse_reader(reader: impl Read) -> Result<Group> {
    Parser::new().reader(reader).parse()
}

fn build(tokenizer: &Tokenizer<TokenKind>, text: &str) -> Result<Group> {
    let mut root = Group::default();
    // Groups opened by `{` and not yet closed; the last one is the cursor.
    let mut open: Vec<Group> = Vec::new();

    for token in tokenizer.tokenize(text) {
        let node = match token.kind() {
            None => Node::Text(token.as_str().to_owned()),
            Some(TokenKind::Whitespace) => Node::Whitespace(token.as_str().to_owned()),
            Some(TokenKind::Comment) => Node::Comment(payload(&token, '%')),
            Some(TokenKind::Command) => Node::Command(payload(&token, '\\')),
            Some(TokenKind::Parameter) => Node::Parameter(parameter(token.as_str())?),
            Some(TokenKind::LeftBrace) => {
                open.push(Group::default());
                continue;
            }
            Some(TokenKind::RightBrace) => match open.pop() {
                Some(group) => Node::Bracket(group),
                None => {
                    return Err(Error::UnbalancedBrackets {
                        offset: token.start(),
                    });
                }
            },
        };
        open.last_mut().unwrap_or(&mut root).push(node);
    }

    if !open.is_empty() {
        debug!("{} bracket group(s) left open at end of input", open.len());
    }
    while let Some(group) = open.pop() {
        open.last_mut().unwrap_or(&mut root).push(Node::Bracket(group));
    }

    Ok(root)
}

fn payload(token: &Token<'_, TokenKind>, marker: char) -> String {
    let text = token.as_str();
    token
        .group(1)
        .unwrap_or_else(|| text.strip_prefix(marker).unwrap_or(text))
        .to_owned()
}

fn parameter(text: &str) -> Result<Parameter> {
    let digits = text.trim_start_matches('#');
    let malformed = || Error::MalformedParameter(text.to_owned());
    let hashes = u32::try_from(text.len() - digits.len()).map_err(|_| malformed())?;
    match digits.parse::<u8>() {
        Ok(index) if hashes > 0 && digits.len() == 1 => Ok(Parameter { hashes, index }),
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use regex::Regex;
    use rstest::rstest;

    #[test]
    fn test_parse_structure() {
        let root = parse("\\foo{a #1}% c\n").unwrap();
        assert_eq!(
            root.children,
            vec![
                Node::command("foo"),
                Node::Bracket(Group::new(vec![
                    Node::text("a"),
                    Node::Whitespace(" ".into()),
                    Node::Parameter(Parameter { hashes: 1, index: 1 }),
                ])),
                Node::Comment(" c\n".into()),
            ]
        );
    }

    #[test]
    fn test_parse_parameter_hashes() {
        let root = parse("####2").unwrap();
        assert_eq!(
            root.children,
            vec![Node::Parameter(Parameter { hashes: 4, index: 2 })]
        );
    }

    #[rstest]
    #[case("#1", 1, 1)]
    #[case("##9", 2, 9)]
    fn test_parameter_counts_hashes(#[case] text: &str, #[case] hashes: u32, #[case] index: u8) {
        assert_eq!(parameter(text).unwrap(), Parameter { hashes, index });
    }

    #[rstest]
    #[case("1")]
    #[case("#")]
    #[case("#12")]
    fn test_parameter_rejects_malformed(#[case] text: &str) {
        assert!(matches!(parameter(text), Err(Error::MalformedParameter(found)) if found == text));
    }

    #[test]
    fn test_round_trip() {
        let source = "\\newcommand{\\test}[1]{Hello, #1!}  % Test command\n\\test{world}\n\n\\upper capitalized\n\\upper{in-between}lowercase\n\\nop{}lol";
        assert_eq!(parse(source).unwrap().to_string(), source);
    }

    #[rstest]
    #[case("}", 0)]
    #[case("a}b", 1)]
    #[case("{x}}", 3)]
    #[case("{\\}}}", 4)]
    fn test_unbalanced_closer(#[case] source: &str, #[case] offset: usize) {
        match parse(source) {
            Err(Error::UnbalancedBrackets { offset: found }) => assert_eq!(found, offset),
            other => panic!("expected UnbalancedBrackets, got {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_group_is_kept() {
        let root = parse("a{b{c").unwrap();
        assert_eq!(root.to_string(), "a{b{c}}");
        assert_eq!(root.depth(), 3);
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(Parser::new().parse(), Err(Error::InvalidInput)));
        assert!(matches!(
            Parser::new().text("x").reader("y".as_bytes()).parse(),
            Err(Error::InvalidInput)
        ));
    }

    #[test]
    fn test_parse_reader() {
        let root = parse_reader("\\x{y}".as_bytes()).unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.to_string(), "\\x{y}");
    }

    #[test]
    fn test_custom_tokenizer() {
        let tokenizer = Tokenizer::new([
            (TokenKind::Command, Regex::new(r"@([a-z]+)").unwrap()),
            (TokenKind::LeftBrace, Regex::new(r"\(").unwrap()),
            (TokenKind::RightBrace, Regex::new(r"\)").unwrap()),
        ]);
        let root = Parser::new().text("@em(x)").tokenizer(&tokenizer).parse().unwrap();
        assert_eq!(
            root.children,
            vec![
                Node::command("em"),
                Node::Bracket(Group::new(vec![Node::text("x")])),
            ]
        );
    }

    fn balanced() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            "[a-zA-Z.,!?\\[\\]*]{1,8}",
            "\\\\[a-zA-Z@]{1,6}",
            "#{1,4}[0-9]",
            "%[a-z {}]{0,8}\n",
            "[ \t\n]{1,3}",
            Just("\\{".to_string()),
            Just("\\}".to_string()),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop::collection::vec(inner, 0..6).prop_map(|parts| format!("{{{}}}", parts.concat()))
        })
    }

    fn document() -> impl Strategy<Value = String> {
        prop::collection::vec(balanced(), 0..8).prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn test_round_trip_property(source in document()) {
            let root = parse(&source);
            prop_assert!(root.is_ok(), "failed to parse {:?}", source);
            prop_assert_eq!(root.unwrap().to_string(), source);
        }

        #[test]
        fn test_stray_closer_property(head in document(), tail in document()) {
            let source = format!("{head}}}{tail}");
            prop_assert!(
                matches!(parse(&source), Err(Error::UnbalancedBrackets { offset }) if offset == head.len()),
                "expected stray closer in {:?}", source
            );
        }
    }
}
