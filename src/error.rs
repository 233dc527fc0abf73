//! Error taxonomy shared by the term model, the converter and the query protocol.

use thiserror::Error;

use crate::query::QueryState;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure reported by this crate.
///
/// Nothing is retried or swallowed internally; each variant carries enough
/// context (the offending term, functor or iterator state) to diagnose it.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed construction input, e.g. an argument count that does not
    /// match the functor arity.
    #[error("invalid term: {0}")]
    InvalidTerm(String),

    /// The engine has no native representation for this kind of term.
    #[error("engine `{engine}` cannot represent {shape}")]
    UnsupportedTermShape {
        /// Name of the engine that rejected the term.
        engine: String,
        /// Description of the rejected shape.
        shape: String,
    },

    /// A functor handle that was never interned in the current session.
    #[error("unknown functor handle {0}")]
    UnknownFunctor(String),

    /// Another query is already open on the session.
    #[error("engine session is busy: query #{active} is still open")]
    EngineBusy {
        /// Ticket of the query currently holding the session.
        active: u64,
    },

    /// `next` was called again after the iterator reported exhaustion.
    #[error("query iterator is exhausted")]
    IteratorExhausted,

    /// The iterator is not in a state that allows the requested operation.
    #[error("cannot {operation} a query iterator in state {state:?}")]
    NotOpen {
        /// The attempted operation.
        operation: &'static str,
        /// The state the iterator was in.
        state: QueryState,
    },

    /// A native list was longer than the configured bound (or cyclic).
    #[error("list exceeds the configured length limit of {limit} elements")]
    ListTooLong {
        /// The configured bound.
        limit: usize,
    },

    /// A lifted term had more nodes than the configured budget.
    #[error("term exceeds the configured size limit of {limit} nodes")]
    TermTooLarge {
        /// The configured bound.
        limit: usize,
    },

    /// `head` or `tail` on the empty list.
    #[error("{0} of the empty list")]
    EmptyList(&'static str),

    /// The list is partial or improper where a proper list was required.
    #[error("malformed list: {0}")]
    MalformedList(String),

    /// A failure reported by the engine itself while solving.
    #[error("engine error: {0}")]
    Engine(String),

    /// Text could not be read as a term or clause.
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        /// One-based line of the error.
        line: usize,
        /// One-based column of the error.
        column: usize,
        /// What the reader expected.
        message: String,
    },

    /// A source file could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::Engine`].
    pub(crate) fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Shorthand for [`Error::InvalidTerm`].
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidTerm(msg.into())
    }
}
