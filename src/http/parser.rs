//! Byte-fed request parser for non-blocking sockets
//!
//! [`RequestParser`] consumes one byte per [`feed`](RequestParser::feed)
//! call and never touches a stream itself, so a single thread can keep
//! one parser per connection and advance each whenever its socket is
//! readable.
//!
//! ```text
//! Start → Method → Space1 → Path → Space2 → Version → NewLine
//!       → HeaderKey ─┬─ ":" → Colon → Space3 → HeaderValue → HeaderNewLine ─┐
//!                    │                                                      │
//!                    └────────────────────── ◄ ─────────────────────────────┘
//!       → EndLine → (Done | Body → Done)
//! ```
//!
//! Any unexpected byte moves the parser into the terminal [`State::Error`].

use crate::{
    config::ParserLimits,
    errors::ParseError,
    http::{request::token_str, types},
    HttpRequest, Method,
};

const VERSION: &[u8; 8] = b"HTTP/1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Start,
    Method,
    Space1,
    Path,
    Space2,
    Version,
    NewLine,
    HeaderKey,
    Colon,
    Space3,
    HeaderValue,
    HeaderNewLine,
    EndLine,
    Body,
    Done,
    Error,
}

/// Result of a successful [`RequestParser::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are needed.
    Pending,
    /// The request is complete; see [`RequestParser::take_request`].
    Complete,
}

#[derive(Debug)]
pub struct RequestParser {
    state: State,
    request: HttpRequest,
    token: Vec<u8>,
    key: Vec<u8>,
    /// Bytes of the current head line, CRLF included.
    line_len: usize,
    error: Option<ParseError>,
    limits: ParserLimits,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(ParserLimits::default())
    }
}

impl RequestParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            state: State::Start,
            request: HttpRequest::new(),
            token: Vec::with_capacity(64),
            key: Vec::with_capacity(32),
            line_len: 0,
            error: None,
            limits,
        }
    }

    #[inline]
    pub const fn state(&self) -> State {
        self.state
    }

    /// `true` once the head is complete and body bytes are expected.
    #[inline]
    pub fn in_body(&self) -> bool {
        self.state == State::Body
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    #[inline]
    pub const fn error(&self) -> Option<ParseError> {
        self.error
    }

    /// The request parsed so far.
    #[inline]
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Hands out the parsed request and rearms the parser for a new one.
    pub fn take_request(&mut self) -> HttpRequest {
        self.reset();
        std::mem::take(&mut self.request)
    }

    pub fn reset(&mut self) {
        self.state = State::Start;
        self.token.clear();
        self.key.clear();
        self.line_len = 0;
        self.error = None;
    }

    /// Feeds bytes until the request completes or `bytes` runs out.
    ///
    /// Returns the progress and how many bytes were consumed; bytes after
    /// a completed request are left untouched.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Result<(Progress, usize), ParseError> {
        if self.state == State::Done {
            return Ok((Progress::Complete, 0));
        }
        for (i, &byte) in bytes.iter().enumerate() {
            if self.feed(byte)? == Progress::Complete {
                return Ok((Progress::Complete, i + 1));
            }
        }
        Ok((Progress::Pending, bytes.len()))
    }

    pub fn feed(&mut self, byte: u8) -> Result<Progress, ParseError> {
        if self.in_head() {
            self.line_len += 1;
            if self.line_len > self.limits.max_line_size.saturating_add(2) {
                let blamed = self.line_state();
                return self.fail(blamed);
            }
        }

        match self.state {
            State::Start => {
                if !byte.is_ascii_alphabetic() {
                    return self.fail(State::Start);
                }
                self.token.push(byte);
                self.state = State::Method;
            }
            State::Method => match byte {
                b' ' => {
                    self.request.method = Method::from_bytes(&self.token);
                    self.token.clear();
                    if self.request.method == Method::Invalid {
                        return self.fail(State::Method);
                    }
                    self.state = State::Space1;
                }
                b if b.is_ascii_alphabetic() => self.token.push(b),
                _ => return self.fail(State::Method),
            },
            State::Space1 => {
                if byte != b'/' {
                    return self.fail(State::Space1);
                }
                self.token.push(byte);
                self.state = State::Path;
            }
            State::Path => match byte {
                b' ' => {
                    let path = match token_str(&self.token) {
                        Ok(path) => types::clean_path(path),
                        Err(_) => return self.fail(State::Path),
                    };
                    self.request.path = path;
                    self.token.clear();
                    self.state = State::Space2;
                }
                b if types::is_path_char(b) => self.token.push(b),
                _ => return self.fail(State::Path),
            },
            State::Space2 => {
                if byte != b'H' {
                    return self.fail(State::Space2);
                }
                self.token.push(byte);
                self.state = State::Version;
            }
            State::Version => {
                let len = self.token.len();
                match (len, byte) {
                    (8, b'\r') => {
                        self.token.clear();
                        self.state = State::NewLine;
                    }
                    (0..=7, b) if VERSION[len] == b => self.token.push(b),
                    _ => return self.fail(State::Version),
                }
            }
            State::NewLine => {
                if byte != b'\n' {
                    return self.fail(State::NewLine);
                }
                self.line_len = 0;
                self.state = State::HeaderKey;
            }
            State::HeaderKey => match byte {
                b'\r' if self.token.is_empty() => self.state = State::EndLine,
                b':' if !self.token.is_empty() => {
                    std::mem::swap(&mut self.key, &mut self.token);
                    self.token.clear();
                    self.state = State::Colon;
                }
                b if types::is_header_key_char(b) => self.token.push(b),
                _ => return self.fail(State::HeaderKey),
            },
            State::Colon => {
                if byte != b' ' {
                    return self.fail(State::Colon);
                }
                self.state = State::Space3;
            }
            State::Space3 => {
                if !types::is_header_value_char(byte) {
                    return self.fail(State::Space3);
                }
                self.token.push(byte);
                self.state = State::HeaderValue;
            }
            State::HeaderValue => match byte {
                b'\r' => {
                    let value = match token_str(&self.token) {
                        Ok(value) => value.to_owned(),
                        Err(_) => return self.fail(State::HeaderValue),
                    };
                    if !self.request.set_header(&self.key, value) {
                        return self.fail(State::HeaderValue);
                    }
                    self.token.clear();
                    self.key.clear();
                    self.state = State::HeaderNewLine;
                }
                b if types::is_header_value_char(b) => self.token.push(b),
                _ => return self.fail(State::HeaderValue),
            },
            State::HeaderNewLine => {
                if byte != b'\n' {
                    return self.fail(State::HeaderNewLine);
                }
                self.line_len = 0;
                self.state = State::HeaderKey;
            }
            State::EndLine => {
                if byte != b'\n' {
                    return self.fail(State::EndLine);
                }
                let len = self.request.content_length;
                if len > self.limits.max_body_size {
                    return self.reject(ParseError::BodyTooLarge(len));
                }
                if len == 0 {
                    self.state = State::Done;
                    return Ok(Progress::Complete);
                }
                self.request.body.reserve_exact(len);
                self.state = State::Body;
            }
            State::Body => {
                self.request.body.push(byte);
                if self.request.body.len() == self.request.content_length {
                    self.state = State::Done;
                    return Ok(Progress::Complete);
                }
            }
            State::Done => return self.fail(State::Body),
            State::Error => {
                return Err(self.error.unwrap_or(ParseError::at(State::Error)));
            }
        }

        Ok(Progress::Pending)
    }

    #[inline]
    fn in_head(&self) -> bool {
        !matches!(self.state, State::Body | State::Done | State::Error)
    }

    /// State blamed for an overlong line, the same one the blocking
    /// parser reports.
    #[inline]
    fn line_state(&self) -> State {
        match self.state {
            State::Start
            | State::Method
            | State::Space1
            | State::Path
            | State::Space2
            | State::Version
            | State::NewLine => State::Path,
            _ => State::HeaderValue,
        }
    }

    #[inline]
    fn error_at(&mut self, state: State) -> ParseError {
        self.reject_err(ParseError::at(state))
    }

    #[inline]
    fn fail(&mut self, state: State) -> Result<Progress, ParseError> {
        Err(self.error_at(state))
    }

    #[inline]
    fn reject(&mut self, err: ParseError) -> Result<Progress, ParseError> {
        Err(self.reject_err(err))
    }

    fn reject_err(&mut self, err: ParseError) -> ParseError {
        self.state = State::Error;
        self.error = Some(err);
        err
    }
}
