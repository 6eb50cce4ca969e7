use thiserror::Error;

/// Everything that can abort a parse or an expansion.
///
/// None of these are recoverable mid-operation: the call that produced one
/// returns it and discards any partial result.
#[derive(Debug, Error)]
pub enum Error {
    /// The parser needs exactly one of source text or a source stream.
    #[error("exactly one of source text or source stream must be supplied")]
    InvalidInput,

    /// A `}` without a matching `{`.
    #[error("unbalanced brackets: unmatched `}}` at byte {offset}")]
    UnbalancedBrackets { offset: usize },

    #[error("unexpected end of input")]
    UnexpectedEndOfInput,

    /// `\newcommand` or `\newenvironment` on a name that is already defined.
    #[error("macro `{0}` is already defined")]
    DuplicateMacro(String),

    #[error("malformed macro name `{0}`")]
    MalformedMacroName(String),

    #[error("malformed argument count `{0}`, expected a single digit")]
    MalformedArgumentCount(String),

    #[error("malformed parameter `{0}`")]
    MalformedParameter(String),

    #[error("recursion limit of {limit} exceeded")]
    RecursionLimitExceeded { limit: usize },

    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
