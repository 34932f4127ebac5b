use crate::http::parser::State;
use std::io;
use thiserror::Error;

/// Failure while turning bytes off the wire into an [`HttpRequest`](crate::HttpRequest).
///
/// Every variant maps to a stable negative code (see [`ParseError::code`]);
/// the dispatcher answers all of them with `400 Bad Request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The underlying stream failed or closed before the head was complete.
    #[error("failed to read from stream")]
    Read,
    /// Method, path or version token is malformed.
    #[error("failed to parse start line (state {state:?})")]
    StartLine { state: State },
    /// A header line is malformed.
    #[error("failed to parse header (state {state:?})")]
    Header { state: State },
    /// Declared `Content-Length` exceeds the configured ceiling.
    #[error("body too large: {0} bytes declared")]
    BodyTooLarge(usize),
    /// Body bytes do not match the announced `Content-Length`.
    #[error("body does not match declared Content-Length")]
    BodyLength,
}

impl ParseError {
    #[inline]
    pub const fn code(&self) -> i32 {
        match self {
            ParseError::Read => -1,
            ParseError::StartLine { .. } => -2,
            ParseError::Header { .. } => -3,
            ParseError::BodyTooLarge(_) => -4,
            ParseError::BodyLength => -5,
        }
    }

    /// State of the incremental parser that rejected the input, when known.
    #[inline]
    pub const fn state(&self) -> Option<State> {
        match self {
            ParseError::StartLine { state } | ParseError::Header { state } => Some(*state),
            ParseError::BodyLength => Some(State::Body),
            _ => None,
        }
    }

    pub(crate) const fn at(state: State) -> Self {
        match state {
            State::Start
            | State::Method
            | State::Space1
            | State::Path
            | State::Space2
            | State::Version
            | State::NewLine => ParseError::StartLine { state },
            State::Body => ParseError::BodyLength,
            _ => ParseError::Header { state },
        }
    }
}

/// Error produced by a request handler.
///
/// Returning `Err` from a handler is equivalent to returning
/// `500 Internal Server Error`; the error is logged and never
/// leaves the dispatcher.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("handler panicked: {0}")]
    Panic(String),
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Message(msg.to_owned())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Message(msg)
    }
}

/// Startup and configuration failures of a connection engine.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to listen on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("failed to create event poller: {0}")]
    Poll(io::Error),
    #[error("server is already running")]
    AlreadyRunning,
    #[error("connection callback is not set")]
    NoCallback,
    #[error("unknown server kind `{0}`")]
    UnknownKind(String),
    #[error("failed to start host runtime: {0}")]
    Runtime(io::Error),
}
