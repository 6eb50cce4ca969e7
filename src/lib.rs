//! Parse LaTeX-like source into a tree and expand the macros it defines.
//!
//! ```
//! use astex::Expander;
//!
//! let mut expander = Expander::default();
//! let out = expander.expand(r"\newcommand{\test}[1]{Hello, #1!}\test{world}").unwrap();
//! assert_eq!(out, "Hello, world!");
//! ```
//!
//! The pieces are usable on their own: [`parse`] builds a [`Group`] that
//! prints back to its exact source, and [`Group::filter`] runs any rewrite
//! rule over it.

pub mod ast;
pub mod error;
pub mod filter;
pub mod parser;
pub mod processor;
pub mod tokenizer;

pub use ast::{Group, Node, Parameter};
pub use error::{Error, Result};
pub use filter::{Lookahead, Rewrite, fix_whitespace};
pub use parser::{Parser, parse, parse_reader};
pub use processor::{Body, Expander, Macro, MacroRegistry, MacroSpec, NativeFn};

/// Deepest group nesting that copying, rewriting or chained macro expansion
/// will go to before failing with [`Error::RecursionLimitExceeded`].
pub const MAX_RECURSION_DEPTH: usize = 256;
