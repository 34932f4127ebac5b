use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Arc, Mutex, MutexGuard},
};

/// A readable/writable byte channel with idempotent close.
///
/// Request parsing and response writing share one stream per
/// connection, so both paths may end up calling [`close`](Self::close).
/// Any call after the first is a no-op.
pub trait ByteStream: Read + Write + Send {
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// Switches between blocking and non-blocking reads.
    fn set_nonblocking(&mut self, _nonblocking: bool) -> io::Result<()> {
        Ok(())
    }

    /// Raw descriptor for readiness registration, if socket-backed.
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        None
    }
}

impl ByteStream for Box<dyn ByteStream> {
    #[inline]
    fn close(&mut self) {
        (**self).close()
    }

    #[inline]
    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    #[inline]
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        (**self).set_nonblocking(nonblocking)
    }

    #[cfg(unix)]
    #[inline]
    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        (**self).raw_fd()
    }
}

// SOCKET

/// [`ByteStream`] over an accepted TCP socket.
#[derive(Debug)]
pub struct SocketStream {
    inner: Option<TcpStream>,
}

impl SocketStream {
    #[inline]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            inner: Some(stream),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.as_ref().and_then(|s| s.peer_addr().ok())
    }

    #[inline]
    fn get(&mut self) -> io::Result<&mut TcpStream> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Read for SocketStream {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.get()?.read(buf)
    }
}

impl Write for SocketStream {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.get()?.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.get()?.flush()
    }
}

impl ByteStream for SocketStream {
    fn close(&mut self) {
        if let Some(mut stream) = self.inner.take() {
            let _ = stream.shutdown(Shutdown::Write);
            discard_unread(&mut stream);
        }
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.get()?.set_nonblocking(nonblocking)
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        self.inner.as_ref().map(|s| s.as_raw_fd())
    }
}

/// Upper bound on request bytes thrown away when closing.
const DISCARD_LIMIT: usize = 64 * 1024;

/// Reads and drops input that has already arrived. Closing a socket with
/// unread input makes the kernel send a reset, which can destroy the
/// response before the peer reads it.
fn discard_unread(stream: &mut TcpStream) {
    if stream.set_nonblocking(true).is_err() {
        return;
    }
    let mut buf = [0u8; 4096];
    let mut discarded = 0;
    while discarded < DISCARD_LIMIT {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => discarded += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return,
        }
    }
}

impl Drop for SocketStream {
    fn drop(&mut self) {
        self.close();
    }
}

// MEMORY

#[derive(Debug, Default)]
struct Pipe {
    input: VecDeque<u8>,
    output: Vec<u8>,
    /// Input will never grow again; reads past the end return EOF.
    finished: bool,
    closed: bool,
    close_calls: usize,
}

/// In-memory [`ByteStream`].
///
/// Clones share the same buffers, so a test can keep one handle to feed
/// input and inspect output while another is owned by a context.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    pipe: Arc<Mutex<Pipe>>,
}

impl MemoryStream {
    /// Stream whose input is exactly `input`, then EOF.
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        let stream = Self::pending(input);
        stream.lock().finished = true;
        stream
    }

    /// Stream that reports `WouldBlock` once `input` is drained,
    /// until [`finish`](Self::finish) is called.
    pub fn pending<T: AsRef<[u8]>>(input: T) -> Self {
        let stream = Self::default();
        stream.push(input);
        stream
    }

    pub fn push<T: AsRef<[u8]>>(&self, bytes: T) {
        self.lock().input.extend(bytes.as_ref());
    }

    pub fn finish(&self) {
        self.lock().finished = true;
    }

    /// Everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.lock().output.clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.lock().output).into_owned()
    }

    /// Number of times `close` was called, including no-op repeats.
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Pipe> {
        self.pipe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.lock();
        if pipe.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if pipe.input.is_empty() {
            return match pipe.finished {
                true => Ok(0),
                false => Err(io::ErrorKind::WouldBlock.into()),
            };
        }

        let n = buf.len().min(pipe.input.len());
        for (dst, src) in buf.iter_mut().zip(pipe.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.lock();
        if pipe.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        pipe.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for MemoryStream {
    fn close(&mut self) {
        let mut pipe = self.lock();
        pipe.close_calls += 1;
        pipe.closed = true;
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
