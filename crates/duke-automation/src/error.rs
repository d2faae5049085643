//! Error types for duke-automation

use dispatch_protocol::StatusCode;
use thiserror::Error;

use crate::config::FailureClass;

/// Result type alias using [`ProxyError`]
pub type Result<T> = std::result::Result<T, ProxyError>;

/// A failure reported by the automation server itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct ServerError {
    pub code: StatusCode,
    pub message: String,
}

impl ServerError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A value that cannot be represented in the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("grid dimensions must be non-zero (got {width}x{height})")]
    EmptyGrid { width: usize, height: usize },

    #[error("{len} values do not exactly fill a {width}x{height} grid")]
    GridSize {
        len: usize,
        width: usize,
        height: usize,
    },

    #[error("grid cell {index} is a nested list")]
    NestedList { index: usize },

    #[error("{count} arguments given, at most {max} are supported")]
    TooManyArgs { count: usize, max: usize },
}

/// A member path that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty member path")]
    Empty,

    #[error("empty segment at offset {0}")]
    EmptySegment(usize),

    #[error("unexpected character '{ch}' at offset {offset}")]
    Unexpected { ch: char, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unclosed argument list starting at offset {0}")]
    UnclosedArgs(usize),

    #[error("invalid literal: {0}")]
    BadLiteral(String),
}

/// Why a single get, put, or call failed.
///
/// The variant tells the caller how much is broken: a `Resolution` or
/// `Marshal` failure affects only this call, `Transient` means the identical
/// call may succeed when re-issued, and `Fatal` means the session is unusable
/// until the caller reconnects.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("cannot resolve '{path}': {message}")]
    Resolution {
        path: String,
        code: Option<StatusCode>,
        message: String,
    },

    #[error("server busy during '{path}': {source}")]
    Transient { path: String, source: ServerError },

    #[error("call '{path}' failed: {source}")]
    Fatal { path: String, source: ServerError },

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error("operation cancelled")]
    Aborted,

    #[error("proxy has been finished")]
    Finished,

    #[error("another request is already in flight on this proxy")]
    Busy,

    #[error("not connected to an automation server")]
    NotConnected,
}

impl CallError {
    /// The status code reported by the server, if the server was reached.
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            CallError::Resolution { code, .. } => *code,
            CallError::Transient { source, .. } | CallError::Fatal { source, .. } => {
                Some(source.code)
            }
            _ => None,
        }
    }

    /// How the failure was classified, for failures that reached the server.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            CallError::Resolution { .. } => Some(FailureClass::Recoverable),
            CallError::Transient { .. } => Some(FailureClass::Transient),
            CallError::Fatal { .. } => Some(FailureClass::Fatal),
            _ => None,
        }
    }

    /// The member path the failure refers to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            CallError::Resolution { path, .. }
            | CallError::Transient { path, .. }
            | CallError::Fatal { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Errors from the proxy's lifecycle operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("cannot connect to automation server '{server}': {source}")]
    Connection { server: String, source: ServerError },

    #[error("failed to start automation worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::Config(e.to_string())
    }
}
