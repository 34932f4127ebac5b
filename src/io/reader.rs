use memchr::memchr;
use std::io::{self, Read};

const DEFAULT_CAPACITY: usize = 4096;

/// Outcome of [`StreamReader::read_byte`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadByte {
    Byte(u8),
    Eof,
    /// Non-blocking source has nothing more right now.
    WouldBlock,
    Error(io::ErrorKind),
}

/// Buffered reader with explicit cursors.
///
/// Bytes in `buf[head..tail]` have been read from the source but not yet
/// consumed. The buffer only grows when a single line does not fit.
#[derive(Debug)]
pub struct StreamReader<R> {
    inner: R,
    buf: Vec<u8>,
    head: usize,
    tail: usize,
}

impl<R: Read> StreamReader<R> {
    #[inline]
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; capacity.max(16)],
            head: 0,
            tail: 0,
        }
    }

    /// Number of bytes buffered but not yet consumed.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.tail - self.head
    }

    #[inline]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Drops any unconsumed bytes.
    #[inline]
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns the next byte, pulling one chunk from the source if the
    /// buffer is empty.
    pub fn read_byte(&mut self) -> ReadByte {
        if self.head == self.tail {
            match self.fill() {
                Ok(0) => return ReadByte::Eof,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadByte::WouldBlock,
                Err(e) => return ReadByte::Error(e.kind()),
            }
        }

        let byte = self.buf[self.head];
        self.head += 1;
        ReadByte::Byte(byte)
    }

    /// Returns the next line including its trailing `\n`.
    ///
    /// `Ok(None)` means the source ended before any byte of a new line.
    /// A line longer than `max` fails with `InvalidData`; a source that
    /// ends mid-line fails with `UnexpectedEof`.
    pub fn read_line(&mut self, max: usize) -> io::Result<Option<&[u8]>> {
        let mut scanned = 0;
        loop {
            let pending = &self.buf[self.head + scanned..self.tail];
            if let Some(i) = memchr(b'\n', pending) {
                let start = self.head;
                let end = self.head + scanned + i + 1;
                if end - start > max {
                    return Err(io::ErrorKind::InvalidData.into());
                }
                self.head = end;
                return Ok(Some(&self.buf[start..end]));
            }

            scanned = self.buffered();
            if scanned > max {
                return Err(io::ErrorKind::InvalidData.into());
            }

            if self.fill()? == 0 {
                return match self.buffered() {
                    0 => Ok(None),
                    _ => Err(io::ErrorKind::UnexpectedEof.into()),
                };
            }
        }
    }

    /// Appends exactly `n` bytes to `out`, using buffered bytes first.
    pub fn read_exact_into(&mut self, n: usize, out: &mut Vec<u8>) -> io::Result<()> {
        let from_buf = n.min(self.buffered());
        out.extend_from_slice(&self.buf[self.head..self.head + from_buf]);
        self.head += from_buf;

        let rest = n - from_buf;
        if rest > 0 {
            let start = out.len();
            out.resize(start + rest, 0);
            if let Err(e) = self.inner.read_exact(&mut out[start..]) {
                out.truncate(start);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reads one chunk from the source into the free tail of the buffer.
    fn fill(&mut self) -> io::Result<usize> {
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        } else if self.tail == self.buf.len() {
            if self.head > 0 {
                self.buf.copy_within(self.head..self.tail, 0);
                self.tail -= self.head;
                self.head = 0;
            } else {
                let len = self.buf.len();
                self.buf.resize(len * 2, 0);
            }
        }

        loop {
            match self.inner.read(&mut self.buf[self.tail..]) {
                Ok(n) => {
                    self.tail += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::stream::MemoryStream;

    #[test]
    fn read_byte_states() {
        let handle = MemoryStream::pending("ab");
        let mut reader = StreamReader::new(handle.clone());

        assert_eq!(reader.read_byte(), ReadByte::Byte(b'a'));
        assert_eq!(reader.read_byte(), ReadByte::Byte(b'b'));
        assert_eq!(reader.read_byte(), ReadByte::WouldBlock);

        handle.finish();
        assert_eq!(reader.read_byte(), ReadByte::Eof);
    }

    #[test]
    fn read_lines() {
        #[rustfmt::skip]
        let cases: [(&str, &[&str], Option<io::ErrorKind>); 4] = [
            ("a\r\nbc\r\n",     &["a\r\n", "bc\r\n"], None),
            ("",                &[],                  None),
            ("abc\r\nxy",       &["abc\r\n"],         Some(io::ErrorKind::UnexpectedEof)),
            ("0123456789\n",    &[],                  Some(io::ErrorKind::InvalidData)),
        ];

        for (input, lines, error) in cases {
            let mut reader = StreamReader::with_capacity(4, MemoryStream::new(input));
            for line in lines {
                assert_eq!(reader.read_line(8).unwrap(), Some(line.as_bytes()), "{input:?}");
            }
            match error {
                Some(kind) => assert_eq!(reader.read_line(8).unwrap_err().kind(), kind),
                None => assert_eq!(reader.read_line(8).unwrap(), None),
            }
        }
    }

    #[test]
    fn line_then_exact_body() {
        let mut reader = StreamReader::with_capacity(16, MemoryStream::new("head\r\nbody-bytes-longer-than-buffer"));
        assert_eq!(reader.read_line(64).unwrap(), Some(&b"head\r\n"[..]));

        let mut body = Vec::new();
        reader.read_exact_into(28, &mut body).unwrap();
        assert_eq!(body, b"body-bytes-longer-than-buffer"[..28]);

        let mut more = Vec::new();
        reader.read_exact_into(1, &mut more).unwrap();
        assert_eq!(more, b"r");
        assert!(reader.read_exact_into(1, &mut more).is_err());
        assert_eq!(more, b"r");
    }

    #[test]
    fn buffer_grows_for_long_line() {
        let line = format!("{}\n", "x".repeat(100));
        let mut reader = StreamReader::with_capacity(16, MemoryStream::new(&line));
        assert_eq!(reader.read_line(1024).unwrap(), Some(line.as_bytes()));
    }
}
