use crate::{
    http::response::write::{BodyWriter, WriteBuffer},
    StatusCode,
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Write},
};

pub(crate) const TEXT_PLAIN: &str = "text/plain";
pub(crate) const APPLICATION_JSON: &str = "application/json";

/// An HTTP/1.1 response under construction.
///
/// `Content-Length` is never stored: it is computed from the body when
/// the response is serialized.
///
/// # Wire format
///
/// ```text
/// HTTP/1.1 SP code SP description CRLF
/// Content-Type: ... CRLF
/// Content-Length: ... CRLF        (omitted for 204)
/// (Key: Value CRLF)*
/// CRLF
/// body                            (omitted for 204)
/// ```
///
/// # Examples
///
/// ```
/// use trio_http::{HttpResponse, StatusCode};
///
/// let mut resp = HttpResponse::new();
/// resp.status(StatusCode::CREATED)
///     .header("X-Id", "7")
///     .body_with(|w| {
///         w.write("id=");
///         w.write(7);
///     });
///
/// let wire = String::from_utf8(resp.to_bytes()).unwrap();
/// assert!(wire.starts_with("HTTP/1.1 201 Created\r\n"));
/// assert!(wire.ends_with("\r\n\r\nid=7"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: StatusCode,
    content_type: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            content_type: TEXT_PLAIN.to_owned(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

// Public API
impl HttpResponse {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[inline]
    pub fn set_content_type(&mut self, value: impl Into<String>) -> &mut Self {
        self.content_type = value.into();
        self
    }

    /// Sets a header; an existing value for the same key is replaced.
    #[inline]
    pub fn header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    #[inline]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[inline]
    pub fn get_body(&self) -> &[u8] {
        &self.body
    }

    /// Length that will be written as `Content-Length`.
    #[inline]
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Replaces the body.
    #[inline]
    pub fn body<T: WriteBuffer>(&mut self, value: T) -> &mut Self {
        self.body.clear();
        value.write_to(&mut self.body);
        self
    }

    /// Replaces the body with whatever `f` writes.
    #[inline]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> &mut Self {
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        self
    }

    /// `text/plain` body.
    pub fn text<T: WriteBuffer>(&mut self, value: T) -> &mut Self {
        self.set_content_type(TEXT_PLAIN).body(value)
    }

    /// `application/json` body serialized from `value`.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> serde_json::Result<&mut Self> {
        let body = serde_json::to_vec(value)?;
        self.body = body;
        Ok(self.set_content_type(APPLICATION_JSON))
    }
}

// Serialization
impl HttpResponse {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let no_content = self.status == StatusCode::NO_CONTENT;

        out.write_all(b"HTTP/1.1 ")?;
        let (code, start) = number_to_bytes(self.status.as_u16() as u64);
        out.write_all(&code[start..])?;
        out.write_all(b" ")?;
        out.write_all(self.status.description().as_bytes())?;
        out.write_all(b"\r\nContent-Type: ")?;
        out.write_all(self.content_type.as_bytes())?;
        out.write_all(b"\r\n")?;

        if !no_content {
            let (len, start) = number_to_bytes(self.body.len() as u64);
            out.write_all(b"Content-Length: ")?;
            out.write_all(&len[start..])?;
            out.write_all(b"\r\n")?;
        }

        for (key, value) in &self.headers {
            out.write_all(key.as_bytes())?;
            out.write_all(b": ")?;
            out.write_all(value.as_bytes())?;
            out.write_all(b"\r\n")?;
        }
        out.write_all(b"\r\n")?;

        if !no_content {
            out.write_all(&self.body)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.body.len());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

#[inline]
const fn number_to_bytes(mut n: u64) -> ([u8; 20], usize) {
    let mut buffer = [b'0'; 20];
    let mut i = 20;

    if n == 0 {
        return (buffer, 19);
    }

    while n > 0 {
        i -= 1;
        buffer[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    (buffer, i)
}

pub mod write {
    use super::number_to_bytes;
    use std::{borrow::Cow, sync::Arc};

    /// Writer handed to [`body_with`](super::HttpResponse::body_with).
    ///
    /// Also implements [`std::io::Write`], so `write!` works on it.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be appended to a response body.
    ///
    /// Implemented for strings, byte buffers, integers, `bool` and `char`.
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (unsigned, $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let (arr, start) = number_to_bytes(*self as u64);
                    buffer.extend_from_slice(&arr[start..]);
                }
            })*
        };
        (signed, $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    if *self < 0 {
                        buffer.push(b'-');
                    }
                    let (arr, start) = number_to_bytes(self.unsigned_abs() as u64);
                    buffer.extend_from_slice(&arr[start..]);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl WriteBuffer for str {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.as_bytes());
        }
    }
    impl WriteBuffer for [u8] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => String, Box<str>, Cow<'_, str>, Arc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! { unsigned, u8, u16, u32, u64, usize }
    impl_write_buffer! { signed, i8, i16, i32, i64, isize }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }
}
