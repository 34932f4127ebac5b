use crate::{
    config::ParserLimits,
    errors::ParseError,
    http::{
        parser::State,
        types::{self, KnownHeader},
    },
    io::reader::StreamReader,
    Method,
};
use memchr::memchr;
use serde::de::DeserializeOwned;
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Read},
};

/// A parsed HTTP/1.1 request.
///
/// # Input data requirements
///
/// The accepted grammar is deliberately narrow:
///
/// ```text
/// METHOD SP PATH SP "HTTP/1.1" CRLF
/// (HeaderKey ":" SP HeaderValue CRLF)*
/// CRLF
/// [Body]
/// ```
///
/// - `METHOD`: one of the [`Method`] tokens, upper case
/// - `PATH`: starts with `/`; alphanumerics and `-._~:/?#[]@!$&'()*+,;=`
/// - `HeaderKey`: alphanumerics and `-`
/// - `HeaderValue`: at least one printable ASCII character, space or tab
/// - `Body`: exactly `Content-Length` bytes; no chunked encoding
///
/// `Content-Length`, `Content-Type` and `Host` (matched case-insensitively)
/// are stored in dedicated fields; every other header goes into the header
/// map, where a repeated key overwrites the earlier value.
///
/// The path is normalized with [`clean_path`](crate::clean_path).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) host: String,
    pub(crate) content_type: String,
    pub(crate) content_length: usize,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) body: Vec<u8>,
}

// Public API
impl HttpRequest {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[inline]
    pub const fn content_length(&self) -> usize {
        self.content_length
    }

    /// Looks up a generic header by its exact key.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    #[inline]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text; invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> String {
        match simdutf8::basic::from_utf8(&self.body) {
            Ok(text) => text.to_owned(),
            Err(_) => String::from_utf8_lossy(&self.body).into_owned(),
        }
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

// Builders used by the parsers and by tests
impl HttpRequest {
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = types::clean_path(path);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key.as_bytes(), value.to_owned());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.content_length = self.body.len();
        self
    }

    /// Routes a header into its dedicated field or the header map.
    ///
    /// A `Content-Length` value that is not a decimal number is rejected.
    pub(crate) fn set_header(&mut self, key: &[u8], value: String) -> bool {
        match KnownHeader::classify(key) {
            KnownHeader::ContentLength => match types::slice_to_usize(value.as_bytes()) {
                Some(len) => self.content_length = len,
                None => return false,
            },
            KnownHeader::ContentType => self.content_type = value,
            KnownHeader::Host => self.host = value,
            KnownHeader::Other => {
                self.headers
                    .insert(String::from_utf8_lossy(key).into_owned(), value);
            }
        }
        true
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} HTTP/1.1\r\n", self.method, self.path)?;
        if !self.host.is_empty() {
            write!(f, "Host: {}\r\n", self.host)?;
        }
        if !self.content_type.is_empty() {
            write!(f, "Content-Type: {}\r\n", self.content_type)?;
        }
        if self.content_length > 0 {
            write!(f, "Content-Length: {}\r\n", self.content_length)?;
        }
        for (key, value) in &self.headers {
            write!(f, "{key}: {value}\r\n")?;
        }
        f.write_str("\r\n")?;
        f.write_str(&String::from_utf8_lossy(&self.body))
    }
}

/// Line-oriented parser that blocks on the stream until a whole request
/// has been read.
///
/// Accepts and rejects exactly the same inputs as the byte-fed
/// [`RequestParser`](crate::RequestParser).
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingParser {
    limits: ParserLimits,
}

impl BlockingParser {
    #[inline]
    pub const fn new(limits: ParserLimits) -> Self {
        Self { limits }
    }

    pub fn parse<R: Read>(&self, reader: &mut StreamReader<R>) -> Result<HttpRequest, ParseError> {
        let mut request = HttpRequest::new();

        let line = self.next_line(reader, State::Path)?.ok_or(ParseError::Read)?;
        parse_start_line(line, &mut request)?;

        loop {
            let line = self
                .next_line(reader, State::HeaderValue)?
                .ok_or(ParseError::Read)?;

            if line == b"\r\n" {
                break;
            }
            if line == b"\n" {
                return Err(ParseError::at(State::EndLine));
            }
            parse_header_line(line, &mut request)?;
        }

        if request.content_length > self.limits.max_body_size {
            return Err(ParseError::BodyTooLarge(request.content_length));
        }
        if request.content_length > 0 {
            request.body.reserve_exact(request.content_length);
            reader
                .read_exact_into(request.content_length, &mut request.body)
                .map_err(|_| ParseError::BodyLength)?;
        }

        Ok(request)
    }

    /// `too_long` is the state blamed when a line exceeds the limit.
    fn next_line<'r, R: Read>(
        &self,
        reader: &'r mut StreamReader<R>,
        too_long: State,
    ) -> Result<Option<&'r [u8]>, ParseError> {
        match reader.read_line(self.limits.max_line_size.saturating_add(2)) {
            Ok(line) => Ok(line),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(ParseError::at(too_long)),
            Err(_) => Err(ParseError::Read),
        }
    }
}

/// `line` includes the terminating `\n`.
fn parse_start_line(line: &[u8], request: &mut HttpRequest) -> Result<(), ParseError> {
    let fail = |state| Err(ParseError::at(state));

    match line.first() {
        Some(byte) if byte.is_ascii_alphabetic() => {}
        _ => return fail(State::Start),
    }

    let method_end = match memchr(b' ', line) {
        Some(i) => i,
        None => return fail(State::Method),
    };
    let method = &line[..method_end];
    if !method.iter().all(u8::is_ascii_alphabetic) {
        return fail(State::Method);
    }
    request.method = Method::from_bytes(method);
    if request.method == Method::Invalid {
        return fail(State::Method);
    }

    let rest = &line[method_end + 1..];
    if rest.first() != Some(&b'/') {
        return fail(State::Space1);
    }
    let path_end = match memchr(b' ', rest) {
        Some(i) => i,
        None => return fail(State::Path),
    };
    let path = &rest[..path_end];
    if !path.iter().copied().all(types::is_path_char) {
        return fail(State::Path);
    }

    let version = &rest[path_end + 1..];
    match version {
        b"HTTP/1.1\r\n" => {}
        [] => return fail(State::Space2),
        [first, ..] if *first != b'H' => return fail(State::Space2),
        [.., b'\r', last] if *last != b'\n' => return fail(State::NewLine),
        _ => return fail(State::Version),
    }

    request.path = types::clean_path(token_str(path)?);
    Ok(())
}

fn parse_header_line(line: &[u8], request: &mut HttpRequest) -> Result<(), ParseError> {
    let fail = |state| Err(ParseError::at(state));

    let content = match line {
        [content @ .., b'\r', b'\n'] => content,
        _ => return fail(State::HeaderValue),
    };

    let colon = match memchr(b':', content) {
        Some(i) => i,
        None => return fail(State::HeaderKey),
    };
    let key = &content[..colon];
    if key.is_empty() || !key.iter().copied().all(types::is_header_key_char) {
        return fail(State::HeaderKey);
    }

    let value = match &content[colon + 1..] {
        [b' ', value @ ..] => value,
        _ => return fail(State::Colon),
    };
    match value.first() {
        Some(byte) if types::is_header_value_char(*byte) => {}
        _ => return fail(State::Space3),
    }
    if !value.iter().copied().all(types::is_header_value_char) {
        return fail(State::HeaderValue);
    }

    if !request.set_header(key, token_str(value)?.to_owned()) {
        return fail(State::HeaderValue);
    }
    Ok(())
}

#[inline]
pub(crate) fn token_str(token: &[u8]) -> Result<&str, ParseError> {
    simdutf8::basic::from_utf8(token).map_err(|_| ParseError::at(State::HeaderValue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::stream::MemoryStream, tools};

    fn parse(raw: &str) -> Result<HttpRequest, ParseError> {
        let mut reader = StreamReader::new(MemoryStream::new(raw));
        BlockingParser::default().parse(&mut reader)
    }

    #[test]
    fn scenario_get() {
        let request = parse(tools::GET_REQUEST).unwrap();

        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.path(), "/some/resource");
        assert_eq!(request.host(), "localhost:8080");
        assert_eq!(request.header("User-Agent"), Some("curl/7.68.0"));
        assert_eq!(request.header("Accept"), Some("*/*"));
        assert_eq!(request.headers().len(), 2);
        assert_eq!(request.content_length(), 0);
        assert!(request.body().is_empty());
    }

    #[test]
    fn scenario_post() {
        let request = parse(tools::POST_REQUEST).unwrap();

        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.content_type(), "application/json");
        assert_eq!(request.content_length(), 16);
        assert_eq!(request.body(), br#"{"key": "value"}"#);

        let value: serde_json::Value = request.json().unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn scenario_body_too_large() {
        let raw = "POST /upload HTTP/1.1\r\nContent-Length: 5000\r\n\r\n";
        assert_eq!(parse(raw), Err(ParseError::BodyTooLarge(5000)));
    }

    #[test]
    fn oversized_content_length_saturates() {
        let raw = "POST / HTTP/1.1\r\nContent-Length: 99999999999999999999999\r\n\r\n";
        assert_eq!(parse(raw), Err(ParseError::BodyTooLarge(usize::MAX)));
    }

    #[test]
    fn line_limit_counts_whole_line() {
        let limit = ParserLimits::default().max_line_size;
        // "GET /" + path + " HTTP/1.1" is 14 bytes plus the path tail.
        let start = |tail: usize| format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(tail));
        let header = format!("GET / HTTP/1.1\r\nX-{}: {}\r\n\r\n", "k".repeat(5000), "v".repeat(5000));

        assert!(parse(&start(limit - 14)).is_ok());
        assert_eq!(parse(&start(limit - 13)), Err(ParseError::at(State::Path)));
        assert_eq!(parse(&header), Err(ParseError::at(State::HeaderValue)));
    }

    #[test]
    fn valid_requests() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",                           Method::Get,    "/"),
            ("DELETE /a/b/ HTTP/1.1\r\n\r\n",                    Method::Delete, "/a/b"),
            ("PATCH /x?y=1&z=[2] HTTP/1.1\r\nX-A: b\r\n\r\n",    Method::Patch,  "/x?y=1&z=[2]"),
            ("OPTIONS /* HTTP/1.1\r\n\r\n",                      Method::Options,"/*"),
        ];

        for (raw, method, path) in cases {
            let request = parse(raw).unwrap_or_else(|e| panic!("{raw:?}: {e}"));
            assert_eq!(request.method(), method);
            assert_eq!(request.path(), path);
        }
    }

    #[test]
    fn header_rules() {
        let raw = "GET / HTTP/1.1\r\n\
                   X-Dup: first\r\n\
                   X-Dup: second\r\n\
                   content-type: text/html\r\n\
                   HOST: example\r\n\
                   X-Value: a:b c\t\r\n\r\n";
        let request = parse(raw).unwrap();

        assert_eq!(request.header("X-Dup"), Some("second"));
        assert_eq!(request.header("X-Value"), Some("a:b c\t"));
        assert_eq!(request.content_type(), "text/html");
        assert_eq!(request.host(), "example");
        assert_eq!(request.headers().len(), 2);
    }

    #[test]
    fn invalid_requests() {
        #[rustfmt::skip]
        let cases = [
            ("",                                          -1),
            ("GET / HTTP/1.1\r\n",                        -1),
            ("GET / HTTP/1.1\r\nHost: x\r\n",             -1),
            (" GET / HTTP/1.1\r\n\r\n",                   -2),
            ("G3T / HTTP/1.1\r\n\r\n",                    -2),
            ("FETCH / HTTP/1.1\r\n\r\n",                  -2),
            ("GET x HTTP/1.1\r\n\r\n",                    -2),
            ("GET /a<b HTTP/1.1\r\n\r\n",                 -2),
            ("GET / HTTP/1.0\r\n\r\n",                    -2),
            ("GET / HTTP/1.1\n\n",                        -2),
            ("GET / HTTP/1.1\r\nBad_Key: v\r\n\r\n",      -3),
            ("GET / HTTP/1.1\r\nKey:v\r\n\r\n",           -3),
            ("GET / HTTP/1.1\r\nKey: \r\n\r\n",           -3),
            ("GET / HTTP/1.1\r\nKey: a\nb\r\n\r\n",       -3),
            ("GET / HTTP/1.1\r\nContent-Length: x\r\n\r\n", -3),
            ("GET / HTTP/1.1\r\nContent-Length: 4097\r\n\r\n", -4),
            ("GET / HTTP/1.1\r\nContent-Length: 99999999999999999999999\r\n\r\n", -4),
            ("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort", -5),
        ];

        for (raw, code) in cases {
            let err = parse(raw).expect_err(raw);
            assert_eq!(err.code(), code, "{raw:?} -> {err}");
        }
    }

    #[test]
    fn display_round_trips_through_parser() {
        let request = parse(tools::POST_REQUEST).unwrap();
        let again = parse(&request.to_string()).unwrap();
        assert_eq!(request, again);
    }
}
