use std::fmt;

use crate::MAX_RECURSION_DEPTH;
use crate::error::{Error, Result};

/// A node of the document tree.
///
/// Every variant renders back to the exact source it was parsed from, so an
/// untouched tree stringifies to its input byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text
    Text(String),
    /// Literal whitespace, kept apart from text so argument readers can skip it
    Whitespace(String),
    /// Comment body without the leading `%`, including the newline if any
    Comment(String),
    /// Command name without the leading backslash
    Command(String),
    /// `#1`, `##2`, ...
    Parameter(Parameter),
    /// Group without delimiters, e.g. the document root or a macro body
    Group(Group),
    /// Group written as `{...}`
    Bracket(Group),
}

/// A macro parameter reference.
///
/// `hashes` counts the `#` markers. Each substitution pass through an
/// enclosing macro halves it, so only a count of 1 refers to the macro being
/// expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub hashes: u32,
    pub index: u8,
}

/// An ordered list of owned child nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub children: Vec<Node>,
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    pub fn command(name: impl Into<String>) -> Self {
        Node::Command(name.into())
    }

    /// Whether this is a text node holding exactly `text`.
    pub fn is_text(&self, text: &str) -> bool {
        matches!(self, Node::Text(t) if t == text)
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(group) | Node::Bracket(group) => Some(group),
            _ => None,
        }
    }

    /// Split a container into its group and the constructor that rebuilds it.
    pub(crate) fn into_container(self) -> Result<(fn(Group) -> Node, Group), Node> {
        match self {
            Node::Group(group) => Ok((Node::Group, group)),
            Node::Bracket(group) => Ok((Node::Bracket, group)),
            leaf => Err(leaf),
        }
    }

    /// Children of a container, or the node itself for anything else.
    pub fn into_children(self) -> Vec<Node> {
        match self {
            Node::Group(group) | Node::Bracket(group) => group.into_nodes(),
            leaf => vec![leaf],
        }
    }

    /// If this is a container with exactly one significant child, that child.
    /// Otherwise the node itself.
    pub(crate) fn unwrap_sole(self, skip_whitespace: bool) -> Node {
        if let Some(child) = self.as_group().and_then(|g| g.sole(skip_whitespace)).cloned() {
            return child;
        }
        self
    }

    /// Container nesting below and including this node; leaves are 0.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 0)];
        while let Some((node, level)) = pending.pop() {
            if let Some(group) = node.as_group() {
                deepest = deepest.max(level + 1);
                pending.extend(group.children.iter().map(|child| (child, level + 1)));
            }
        }
        deepest
    }

    /// Clone, refusing trees nested deeper than [`MAX_RECURSION_DEPTH`].
    pub fn deep_copy(&self) -> Result<Node> {
        if self.depth() > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded {
                limit: MAX_RECURSION_DEPTH,
            });
        }
        Ok(self.clone())
    }
}

impl Group {
    pub fn new(children: Vec<Node>) -> Self {
        Self { children }
    }

    pub fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    /// Add `node`, or all of its children if it is itself a container.
    pub fn take(&mut self, node: Node) {
        self.children.extend(node.into_children());
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The children, leaving this group empty.
    pub fn into_nodes(mut self) -> Vec<Node> {
        std::mem::take(&mut self.children)
    }

    /// The only child that is not a comment (nor whitespace, if asked).
    pub fn sole(&self, skip_whitespace: bool) -> Option<&Node> {
        let mut significant = self.children.iter().filter(|node| match node {
            Node::Comment(_) => false,
            Node::Whitespace(_) => !skip_whitespace,
            _ => true,
        });
        match (significant.next(), significant.next()) {
            (Some(node), None) => Some(node),
            _ => None,
        }
    }

    /// Nesting of containers below this group; a flat group is 1.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Node::depth).max().unwrap_or(0)
    }

    /// Clone, refusing trees nested deeper than [`MAX_RECURSION_DEPTH`].
    pub fn deep_copy(&self) -> Result<Group> {
        if self.depth() > MAX_RECURSION_DEPTH + 1 {
            return Err(Error::RecursionLimitExceeded {
                limit: MAX_RECURSION_DEPTH,
            });
        }
        Ok(self.clone())
    }
}

// Unnesting into a work list keeps dropping a deeply nested tree off the call
// stack. Every group popped from the list is already empty when it drops.
impl Drop for Group {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(node) = pending.pop() {
            if let Node::Group(mut group) | Node::Bracket(mut group) = node {
                pending.append(&mut group.children);
            }
        }
    }
}

impl From<Vec<Node>> for Group {
    fn from(children: Vec<Node>) -> Self {
        Self::new(children)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.hashes {
            f.write_str("#")?;
        }
        write!(f, "{}", self.index)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.children.iter().try_for_each(|child| write!(f, "{child}"))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(text) | Node::Whitespace(text) => f.write_str(text),
            Node::Comment(text) => write!(f, "%{text}"),
            Node::Command(name) => write!(f, "\\{name}"),
            Node::Parameter(parameter) => write!(f, "{parameter}"),
            Node::Group(group) => write!(f, "{group}"),
            Node::Bracket(group) => write!(f, "{{{group}}}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bracket(children: Vec<Node>) -> Node {
        Node::Bracket(Group::new(children))
    }

    #[test]
    fn test_display_variants() {
        let group = Group::new(vec![
            Node::command("foo"),
            bracket(vec![
                Node::text("a"),
                Node::Whitespace(" ".into()),
                Node::Parameter(Parameter { hashes: 2, index: 1 }),
            ]),
            Node::Comment(" note\n".into()),
        ]);
        assert_eq!(group.to_string(), "\\foo{a ##1}% note\n");
    }

    #[test]
    fn test_take_unwraps_containers() {
        let mut group = Group::default();
        group.take(bracket(vec![Node::text("a"), Node::text("b")]));
        group.take(Node::text("c"));
        assert_eq!(group.children.len(), 3);
        assert_eq!(group.to_string(), "abc");
    }

    #[test]
    fn test_sole_child() {
        let group = Group::new(vec![
            Node::Whitespace(" ".into()),
            Node::command("x"),
            Node::Comment("c\n".into()),
        ]);
        assert_eq!(group.sole(true), Some(&Node::command("x")));
        assert_eq!(group.sole(false), None);

        let wrapped = bracket(vec![Node::Whitespace(" ".into()), Node::command("x")]);
        assert_eq!(wrapped.clone().unwrap_sole(true), Node::command("x"));
        assert_eq!(wrapped.clone().unwrap_sole(false), wrapped);
    }

    #[test]
    fn test_depth() {
        let leaf = Node::text("x");
        assert_eq!(leaf.depth(), 0);
        let nested = bracket(vec![bracket(vec![leaf]), Node::text("y")]);
        assert_eq!(nested.depth(), 2);
        assert_eq!(Group::new(vec![nested]).depth(), 3);
    }

    #[test]
    fn test_deep_copy_limit() {
        let mut node = Node::text("x");
        for _ in 0..MAX_RECURSION_DEPTH {
            node = bracket(vec![node]);
        }
        assert_eq!(node.deep_copy().unwrap(), node);
        assert!(Group::new(vec![node.clone()]).deep_copy().is_ok());

        let deeper = bracket(vec![node]);
        assert!(matches!(
            deeper.deep_copy(),
            Err(Error::RecursionLimitExceeded { .. })
        ));
        assert!(matches!(
            Group::new(vec![deeper]).deep_copy(),
            Err(Error::RecursionLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_drop_deeply_nested() {
        let mut node = Node::text("x");
        for _ in 0..200_000 {
            node = bracket(vec![node, Node::text("y")]);
        }
        let group = Group::new(vec![node]);
        assert!(group.deep_copy().is_err());
        drop(group);
    }

    #[test]
    fn test_into_nodes() {
        let group = Group::new(vec![Node::text("a"), bracket(vec![Node::text("b")])]);
        let nodes = group.into_nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].to_string(), "{b}");
    }
}
