//! Single-pass tree rewriting.
//!
//! [`Group::filter`] walks a tree in pre-order and hands every node to a rule
//! together with the [`Lookahead`] of its not yet visited siblings. The rule
//! decides what replaces the node and may consume or re-inject siblings ahead
//! of it, which is how macro arguments are read and expansions are rescanned.

use std::collections::VecDeque;

use crate::MAX_RECURSION_DEPTH;
use crate::ast::{Group, Node};
use crate::error::{Error, Result};

/// What a rule wants in place of the node it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Emit this node. Containers are descended into before the next sibling.
    Keep(Node),
    /// Emit nothing.
    Drop,
    /// Emit these nodes as they are, without visiting them.
    Splice(Vec<Node>),
}

/// The remaining siblings at one level of the traversal.
///
/// Rules may take nodes off the front and put nodes back on the front; the
/// tail is never touched, so everything a rule does not consume is still
/// visited in its original order.
#[derive(Debug, Default)]
pub struct Lookahead {
    nodes: VecDeque<Node>,
    depth: usize,
}

impl Lookahead {
    fn new(nodes: Vec<Node>, depth: usize) -> Self {
        Self {
            nodes: nodes.into(),
            depth,
        }
    }

    /// Nesting level of the group these siblings belong to; the root is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn peek(&self) -> Option<&Node> {
        self.nodes.front()
    }

    pub fn pop(&mut self) -> Option<Node> {
        self.nodes.pop_front()
    }

    pub fn push_front(&mut self, node: Node) {
        self.nodes.push_front(node);
    }

    /// Put `nodes` in front so that the first of them is read next.
    pub fn push_all_front(&mut self, nodes: Vec<Node>) {
        for node in nodes.into_iter().rev() {
            self.nodes.push_front(node);
        }
    }

    /// Next significant unit, failing at the end of the level.
    pub fn read_next(&mut self) -> Result<Node> {
        self.try_read_next().ok_or(Error::UnexpectedEndOfInput)
    }

    /// Next significant unit: whitespace and comments are skipped, a group
    /// comes back whole and text comes back one character at a time, the rest
    /// of the text staying in front of the queue.
    pub fn try_read_next(&mut self) -> Option<Node> {
        while let Some(node) = self.nodes.pop_front() {
            match node {
                Node::Whitespace(_) | Node::Comment(_) => continue,
                Node::Text(text) => {
                    let mut chars = text.chars();
                    let Some(first) = chars.next() else {
                        return Some(Node::Text(text));
                    };
                    let rest = chars.as_str();
                    if !rest.is_empty() {
                        self.nodes.push_front(Node::Text(rest.to_owned()));
                    }
                    return Some(Node::Text(first.to_string()));
                }
                other => return Some(other),
            }
        }
        None
    }
}

/// A group being rebuilt: output so far plus the siblings still to visit.
struct Frame {
    wrap: fn(Group) -> Node,
    output: Vec<Node>,
    lookahead: Lookahead,
}

impl Frame {
    fn new(wrap: fn(Group) -> Node, group: Group, depth: usize) -> Self {
        Self {
            wrap,
            output: Vec::with_capacity(group.children.len()),
            lookahead: Lookahead::new(group.into_nodes(), depth),
        }
    }
}

impl Group {
    /// Rewrite a copy of this tree with `rule`; see [`Group::into_filtered`].
    pub fn filter<F>(&self, rule: F) -> Result<Group>
    where
        F: FnMut(Node, &mut Lookahead) -> Result<Rewrite>,
    {
        self.deep_copy()?.into_filtered(rule)
    }

    /// Rewrite this tree in place with `rule`.
    ///
    /// The rule sees the root first, as a [`Node::Group`] with an empty
    /// lookahead; whatever it returns becomes the new root's content. Then
    /// every descendant is visited in pre-order. A container the rule keeps
    /// is entered right away, so its children are rewritten before the
    /// siblings that follow it. Nesting deeper than [`MAX_RECURSION_DEPTH`]
    /// fails with [`Error::RecursionLimitExceeded`].
    pub fn into_filtered<F>(self, mut rule: F) -> Result<Group>
    where
        F: FnMut(Node, &mut Lookahead) -> Result<Rewrite>,
    {
        let root = match rule(Node::Group(self), &mut Lookahead::default())? {
            Rewrite::Keep(node) => match node.into_container() {
                Ok((_, group)) => group,
                Err(leaf) => Group::new(vec![leaf]),
            },
            Rewrite::Drop => Group::default(),
            Rewrite::Splice(nodes) => Group::new(nodes),
        };

        let mut current = Frame::new(Node::Group, root, 0);
        let mut parents: Vec<Frame> = Vec::new();
        loop {
            let Some(node) = current.lookahead.pop() else {
                let finished = Group::new(std::mem::take(&mut current.output));
                match parents.pop() {
                    Some(parent) => {
                        let wrap = current.wrap;
                        current = parent;
                        current.output.push(wrap(finished));
                        continue;
                    }
                    None => return Ok(finished),
                }
            };

            match rule(node, &mut current.lookahead)? {
                Rewrite::Drop => {}
                Rewrite::Splice(nodes) => current.output.extend(nodes),
                Rewrite::Keep(node) => match node.into_container() {
                    Ok((wrap, group)) => {
                        let depth = current.lookahead.depth() + 1;
                        if depth > MAX_RECURSION_DEPTH {
                            return Err(Error::RecursionLimitExceeded {
                                limit: MAX_RECURSION_DEPTH,
                            });
                        }
                        let child = Frame::new(wrap, group, depth);
                        parents.push(std::mem::replace(&mut current, child));
                    }
                    Err(leaf) => current.output.push(leaf),
                },
            }
        }
    }
}

/// Insert a space between a command and text that would otherwise run into
/// its name, e.g. after a rewrite removed the group between `\foo` and `bar`.
pub fn fix_whitespace(root: &Group) -> Result<Group> {
    root.filter(|node, lookahead| {
        let runs_on = |text: &str| text.starts_with(|c: char| c.is_alphabetic());
        let collides = matches!(&node, Node::Command(name) if runs_on(name))
            && matches!(lookahead.peek(), Some(Node::Text(next)) if runs_on(next));
        if collides {
            lookahead.push_front(Node::Whitespace(" ".into()));
        }
        Ok(Rewrite::Keep(node))
    })
}
