//! Core HTTP protocol types and byte-level helpers shared by both parsers

use std::{fmt, net::SocketAddr};

// CHARACTER CLASSES

const PATH: u8 = 0b001;
const HEADER_KEY: u8 = 0b010;
const HEADER_VALUE: u8 = 0b100;

const PATH_PUNCT: &[u8] = b"-._~:/?#[]@!$&'()*+,;=";

const fn build_char_class() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let byte = i as u8;
        let mut class = 0;

        if byte.is_ascii_alphanumeric() {
            class |= PATH | HEADER_KEY;
        }
        if byte == b'-' {
            class |= HEADER_KEY;
        }
        let mut j = 0;
        while j < PATH_PUNCT.len() {
            if PATH_PUNCT[j] == byte {
                class |= PATH;
            }
            j += 1;
        }
        if (byte >= 33 && byte <= 126) || byte == b'\t' || byte == b' ' {
            class |= HEADER_VALUE;
        }

        table[i] = class;
        i += 1;
    }
    table
}

static CHAR_CLASS: [u8; 256] = build_char_class();

/// Alphanumeric or one of `-._~:/?#[]@!$&'()*+,;=`.
#[inline(always)]
pub(crate) fn is_path_char(byte: u8) -> bool {
    CHAR_CLASS[byte as usize] & PATH != 0
}

/// Alphanumeric or `-`.
#[inline(always)]
pub(crate) fn is_header_key_char(byte: u8) -> bool {
    CHAR_CLASS[byte as usize] & HEADER_KEY != 0
}

/// Printable ASCII (33..=126), tab or space.
#[inline(always)]
pub(crate) fn is_header_value_char(byte: u8) -> bool {
    CHAR_CLASS[byte as usize] & HEADER_VALUE != 0
}

/// Decimal digits to `usize`, saturating at `usize::MAX`.
///
/// `None` if `bytes` is empty or holds anything but digits.
#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .saturating_mul(10)
            .saturating_add((byte - b'0') as usize);
    }

    Some(result)
}

/// Header keys extracted into dedicated request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KnownHeader {
    ContentLength,
    ContentType,
    Host,
    Other,
}

impl KnownHeader {
    #[inline]
    pub(crate) fn classify(name: &[u8]) -> Self {
        match name.len() {
            14 if name.eq_ignore_ascii_case(b"content-length") => KnownHeader::ContentLength,
            12 if name.eq_ignore_ascii_case(b"content-type") => KnownHeader::ContentType,
            4 if name.eq_ignore_ascii_case(b"host") => KnownHeader::Host,
            _ => KnownHeader::Other,
        }
    }
}

// PATH

/// Prefixes `/` when absent and strips every trailing `/`.
///
/// The root (and the empty string) normalize to `/`.
///
/// ```
/// use trio_http::clean_path;
///
/// assert_eq!(clean_path("api/users/"), "/api/users");
/// assert_eq!(clean_path("/api//"), "/api");
/// assert_eq!(clean_path(""), "/");
/// ```
pub fn clean_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_owned();
    }
    match trimmed.starts_with('/') {
        true => trimmed.to_owned(),
        false => format!("/{trimmed}"),
    }
}

/// Formats a peer address as a `Host` value, omitting port 0 and 80.
pub fn address_to_host(addr: &SocketAddr) -> String {
    match addr.port() {
        0 | 80 => addr.ip().to_string(),
        _ => addr.to_string(),
    }
}

// METHOD

/// HTTP request methods
///
/// [`Method::Invalid`] is the value of a request that has not been parsed
/// (or whose method token was not recognized).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
    #[default]
    Invalid,
}

impl Method {
    #[inline]
    pub fn from_bytes(src: &[u8]) -> Self {
        match src {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"PATCH" => Method::Patch,
            _ => Method::Invalid,
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// STATUS_CODE

/// HTTP status code.
///
/// Any `u16` is representable so handlers can return codes this crate
/// has no name for; those are described as `"Unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub u16);

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:literal, $str:literal);
    )+) => {
        impl StatusCode {
            $(
                #[doc = concat!("`", stringify!($num), " ", $str, "`")]
                $(#[$docs])*
                pub const $name: StatusCode = StatusCode($num);
            )+

            /// Reason phrase written on the status line.
            #[inline]
            pub const fn description(&self) -> &'static str {
                match self.0 {
                    $($num => $str,)+
                    _ => "Unknown",
                }
            }
        }
    }
}

set_status_codes! {
    OK = (200, "OK");
    CREATED = (201, "Created");
    ACCEPTED = (202, "Accepted");
    /// No `Content-Length` and no body are written for this status.
    NO_CONTENT = (204, "No Content");

    MOVED_PERMANENTLY = (301, "Moved Permanently");
    FOUND = (302, "Found");
    NOT_MODIFIED = (304, "Not Modified");

    /// Answer to every request the parser rejects.
    BAD_REQUEST = (400, "Bad Request");
    UNAUTHORIZED = (401, "Unauthorized");
    FORBIDDEN = (403, "Forbidden");
    /// No route is registered for the path.
    NOT_FOUND = (404, "Not Found");
    /// The path is routed but not for this method.
    METHOD_NOT_ALLOWED = (405, "Method Not Allowed");
    CONFLICT = (409, "Conflict");
    PAYLOAD_TOO_LARGE = (413, "Payload Too Large");
    UNSUPPORTED_MEDIA_TYPE = (415, "Unsupported Media Type");
    UNPROCESSABLE_ENTITY = (422, "Unprocessable Entity");
    TOO_MANY_REQUESTS = (429, "Too Many Requests");

    /// A handler failed or panicked.
    INTERNAL_SERVER_ERROR = (500, "Internal Server Error");
    NOT_IMPLEMENTED = (501, "Not Implemented");
    SERVICE_UNAVAILABLE = (503, "Service Unavailable");
}

impl StatusCode {
    #[inline]
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_ok(&self) -> bool {
        self.0 == 200
    }
}

impl Default for StatusCode {
    #[inline]
    fn default() -> Self {
        StatusCode::OK
    }
}

impl From<u16> for StatusCode {
    #[inline]
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.description())
    }
}
