use std::io;

use thiserror::Error;

/// An error that can occur while compiling a pattern to source code.
///
/// Every variant is fatal to the generation run: nothing is emitted when
/// `generate` returns an error.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration itself is unusable (empty pattern, invalid routine
    /// name, conflicting engine overrides, zero state budget).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The pattern does not parse as a regular expression.
    #[error("parse error in pattern: {0}")]
    Parse(#[from] Box<regex_syntax::Error>),

    /// The pattern parsed, but uses a construct this compiler does not
    /// support (lookaround, line anchors in multi-line mode, non-UTF-8
    /// byte classes).
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// A forced tagged DFA exceeded its state budget, or the memoized
    /// engine's table would exceed its emission-time analytical bound.
    #[error("pattern too complex for the selected engine: {0}")]
    EngineTooComplex(String),

    /// A precompiled replacement template failed to parse or validate.
    #[error("replacement template {index}: {source}")]
    Template {
        /// Position of the offending template in `Config::replacers`.
        index: usize,
        #[source]
        source: TemplateError,
    },

    /// Writing the generated source to the output destination failed.
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

impl From<regex_syntax::Error> for Error {
    fn from(e: regex_syntax::Error) -> Error {
        Error::Parse(Box::new(e))
    }
}

/// An error from parsing or resolving a `$`-style replacement template.
///
/// For precompiled templates this surfaces at generation time (wrapped in
/// [`Error::Template`]); for runtime templates the emitted replace routines
/// return it to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A `${` with no matching `}`.
    #[error("unclosed group reference starting at byte {0}")]
    UnclosedBrace(usize),

    /// `${}` with nothing inside.
    #[error("empty group reference at byte {0}")]
    EmptyReference(usize),

    /// `${1abc}` and friends: digits followed by non-digits.
    #[error("malformed group reference `{0}`")]
    MalformedReference(String),

    /// An indexed reference past the pattern's capture count.
    #[error("group index {index} out of range (pattern has {count} groups)")]
    IndexOutOfRange {
        index: usize,
        count: usize,
    },

    /// A named reference that matches no capture group in the pattern.
    #[error("unknown group name `{0}`")]
    UnknownName(String),
}

/// An error surfaced by the streaming runtime.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The configured buffer cannot hold the longest possible match.
    #[error("stream buffer of {got} bytes is below the minimum of {min}")]
    BufferTooSmall {
        got: usize,
        min: usize,
    },

    /// The source reader failed.
    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),

    /// The cancellation handle fired. Checked at chunk boundaries; wins over
    /// a callback that asked to stop in the same chunk.
    #[error("stream cancelled")]
    Cancelled,
}
