use crate::{
    config::ParserLimits,
    errors::ParseError,
    http::{
        parser::{Progress, RequestParser},
        types,
    },
    io::{
        reader::{ReadByte, StreamReader},
        stream::ByteStream,
        writer::StreamWriter,
    },
    BlockingParser, HttpRequest, HttpResponse,
};
use std::{io, net::SocketAddr};

/// Freshly accepted connection: peer address plus its stream.
pub struct AcceptData {
    pub peer: Option<SocketAddr>,
    pub stream: Box<dyn ByteStream>,
}

impl AcceptData {
    pub fn new<S: ByteStream + 'static>(peer: Option<SocketAddr>, stream: S) -> Self {
        Self {
            peer,
            stream: Box::new(stream),
        }
    }
}

/// One request/response exchange on one connection.
///
/// The context owns the connection's stream; dropping the context closes
/// it. A request that failed to parse still yields a context, with
/// [`parse_error`](Self::parse_error) set, so the dispatcher can answer
/// with `400 Bad Request`.
pub struct HttpContext {
    pub request: HttpRequest,
    pub response: HttpResponse,
    stream: Box<dyn ByteStream>,
    peer: Option<SocketAddr>,
    parse_error: Option<ParseError>,
}

impl HttpContext {
    pub fn new(request: HttpRequest, stream: Box<dyn ByteStream>) -> Self {
        Self {
            request,
            response: HttpResponse::new(),
            stream,
            peer: None,
            parse_error: None,
        }
    }

    /// Reads and parses a whole request, blocking on the stream.
    pub fn receive(data: AcceptData, parser: &BlockingParser) -> Self {
        let AcceptData { peer, stream } = data;
        let mut reader = StreamReader::new(stream);

        let (request, parse_error) = match parser.parse(&mut reader) {
            Ok(request) => (request, None),
            Err(err) => (HttpRequest::new(), Some(err)),
        };

        let mut ctx = Self::new(request, reader.into_inner());
        ctx.set_peer(peer);
        ctx.parse_error = parse_error;
        ctx
    }

    #[inline]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[inline]
    pub fn parse_error(&self) -> Option<ParseError> {
        self.parse_error
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    /// Serializes the response onto the connection and flushes it.
    pub fn write_response(&mut self) -> io::Result<()> {
        let mut writer = StreamWriter::new(&mut self.stream);
        self.response.write_to(&mut writer)?;
        io::Write::flush(&mut writer)
    }

    /// Closes the connection; later calls are no-ops.
    #[inline]
    pub fn close(&mut self) {
        self.stream.close();
    }

    fn set_peer(&mut self, peer: Option<SocketAddr>) {
        self.peer = peer;
        if self.request.host.is_empty() {
            if let Some(addr) = peer {
                self.request.host = types::address_to_host(&addr);
            }
        }
    }
}

impl Drop for HttpContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds an [`HttpContext`] from a non-blocking stream, a chunk at a time.
///
/// Call [`advance`](Self::advance) whenever the stream becomes readable;
/// it drains everything currently available and reports whether the
/// request is complete.
pub struct AsyncContextBuilder {
    reader: StreamReader<Box<dyn ByteStream>>,
    parser: RequestParser,
    peer: Option<SocketAddr>,
}

impl AsyncContextBuilder {
    pub fn new(data: AcceptData, limits: ParserLimits) -> Self {
        Self {
            reader: StreamReader::new(data.stream),
            parser: RequestParser::new(limits),
            peer: data.peer,
        }
    }

    #[inline]
    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    #[cfg(unix)]
    #[inline]
    pub fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        self.reader.get_ref().raw_fd()
    }

    /// Feeds every byte that can be read without blocking.
    ///
    /// `Ok(Pending)` means the stream would block before the request was
    /// complete. End of stream is [`ParseError::Read`] while the head is
    /// incomplete and [`ParseError::BodyLength`] inside the body.
    pub fn advance(&mut self) -> Result<Progress, ParseError> {
        loop {
            match self.reader.read_byte() {
                ReadByte::Byte(byte) => {
                    if self.parser.feed(byte)? == Progress::Complete {
                        return Ok(Progress::Complete);
                    }
                }
                ReadByte::WouldBlock => return Ok(Progress::Pending),
                ReadByte::Eof if self.parser.in_body() => return Err(ParseError::BodyLength),
                ReadByte::Eof | ReadByte::Error(_) => return Err(ParseError::Read),
            }
        }
    }

    /// Turns the builder into a context; the stream is switched back to
    /// blocking mode so the response can be written in one go.
    pub fn finish(mut self, error: Option<ParseError>) -> HttpContext {
        let request = match error {
            Some(_) => HttpRequest::new(),
            None => self.parser.take_request(),
        };
        let mut stream = self.reader.into_inner();
        let _ = stream.set_nonblocking(false);

        let mut ctx = HttpContext::new(request, stream);
        ctx.set_peer(self.peer);
        ctx.parse_error = error;
        ctx
    }

    /// Closes the stream without building a context.
    pub fn abort(self) {
        let mut stream = self.reader.into_inner();
        stream.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::stream::MemoryStream, tools, Method, StatusCode};
    use std::net::{IpAddr, Ipv4Addr};

    fn peer(port: u16) -> Option<SocketAddr> {
        Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    #[test]
    fn receive_blocking() {
        let handle = MemoryStream::new(tools::GET_REQUEST);
        let ctx = HttpContext::receive(AcceptData::new(peer(4000), handle.clone()), &BlockingParser::default());

        assert_eq!(ctx.parse_error(), None);
        assert_eq!(ctx.request.method(), Method::Get);
        assert_eq!(ctx.request.host(), "localhost:8080");
        assert_eq!(ctx.peer(), peer(4000));

        drop(ctx);
        assert!(handle.is_closed());
    }

    #[test]
    fn host_from_peer_when_header_missing() {
        #[rustfmt::skip]
        let cases = [
            (4000, "127.0.0.1:4000"),
            (80,   "127.0.0.1"),
            (0,    "127.0.0.1"),
        ];

        for (port, host) in cases {
            let stream = MemoryStream::new("GET / HTTP/1.1\r\n\r\n");
            let ctx = HttpContext::receive(AcceptData::new(peer(port), stream), &BlockingParser::default());
            assert_eq!(ctx.request.host(), host);
        }
    }

    #[test]
    fn receive_keeps_parse_error() {
        let stream = MemoryStream::new("BAD\r\n\r\n");
        let ctx = HttpContext::receive(AcceptData::new(None, stream), &BlockingParser::default());
        assert_eq!(ctx.parse_error().map(|e| e.code()), Some(-2));
    }

    #[test]
    fn write_response_and_double_close() {
        let handle = MemoryStream::new("");
        let mut ctx = HttpContext::new(HttpRequest::new(), Box::new(handle.clone()));
        ctx.response.status(StatusCode::OK).body("hi");
        ctx.write_response().unwrap();

        ctx.close();
        ctx.close();
        drop(ctx);

        assert!(handle.output_string().ends_with("\r\n\r\nhi"));
        assert!(handle.is_closed());
        assert_eq!(handle.close_calls(), 3);
    }

    #[test]
    fn async_builder_resumes_after_would_block() {
        let (head, body) = tools::POST_REQUEST.split_at(tools::POST_REQUEST.len() - 6);
        let handle = MemoryStream::pending(head);
        let mut builder = AsyncContextBuilder::new(AcceptData::new(peer(9000), handle.clone()), ParserLimits::default());

        assert_eq!(builder.advance(), Ok(Progress::Pending));
        assert!(builder.parser().in_body());

        handle.push(body);
        assert_eq!(builder.advance(), Ok(Progress::Complete));

        let ctx = builder.finish(None);
        assert_eq!(ctx.request.body(), br#"{"key": "value"}"#);
        assert_eq!(ctx.request.host(), "localhost:8080");
    }

    #[test]
    fn async_builder_eof() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n",                                    ParseError::Read),
            ("POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\nabc",       ParseError::BodyLength),
            ("POST / HTTP/1.1\r\nContent-Length: 9000\r\n\r\n",       ParseError::BodyTooLarge(9000)),
        ];

        for (raw, expected) in cases {
            let mut builder = AsyncContextBuilder::new(AcceptData::new(None, MemoryStream::new(raw)), ParserLimits::default());
            assert_eq!(builder.advance(), Err(expected), "{raw:?}");

            let ctx = builder.finish(Some(expected));
            assert_eq!(ctx.parse_error(), Some(expected));
        }
    }
}
