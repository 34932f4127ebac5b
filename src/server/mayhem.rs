//! Readiness-driven engine
//!
//! A single event thread owns the listener and every connection that is
//! still sending its request. Each connection is registered under a token
//! equal to its file descriptor and parsed incrementally as bytes arrive,
//! so a slow client never holds up the others. Completed requests (and
//! rejected ones, which get a `400`) are dispatched on the worker pool.
//!
//! Registrations are edge-triggered: the listener is drained until
//! `WouldBlock` and each readable connection is read until it would block
//! or its request is complete. When accepting fails before the listener
//! would block (out of descriptors), no further edge is coming for the
//! connections left in the backlog, so the drain is retried every few
//! milliseconds until it succeeds.

use crate::{
    config::{ParserLimits, ServerConfig, ServerKind},
    errors::{ParseError, ServerError},
    http::{
        context::{AcceptData, AsyncContextBuilder, HttpContext},
        parser::Progress,
    },
    io::stream::SocketStream,
    log::Logger,
    server::engine::{ConnectionCallback, LoopContext, Server, ServerCore, ServerTask},
    sync::pool::ThreadPool,
};
use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    os::unix::io::AsRawFd,
    sync::Arc,
    time::Duration,
};

/// Connections with a descriptor at or above this are refused.
pub const MAX_FD: usize = 1024;
pub const MAX_EVENTS: usize = 64;

const LISTENER: Token = Token(usize::MAX);
const POLL_TIMEOUT: Duration = Duration::from_millis(50);
/// Poll timeout while a failed accept may have left a backlog behind.
const ACCEPT_RETRY: Duration = Duration::from_millis(5);

pub struct MayhemServer {
    core: ServerCore,
}

impl MayhemServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_logger(config, ServerCore::default_logger())
    }

    pub fn with_logger(config: ServerConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            core: ServerCore::new(ServerKind::Mayhem, config, logger),
        }
    }

    pub fn set_limits(&mut self, limits: ParserLimits) {
        self.core.set_limits(limits);
    }
}

impl Server for MayhemServer {
    #[inline]
    fn kind(&self) -> ServerKind {
        self.core.kind()
    }

    fn set_on_connection(&mut self, callback: ConnectionCallback) {
        self.core.set_on_connection(callback);
    }

    fn start(&self) -> ServerTask {
        let prepare = |ctx: &LoopContext| {
            let poll = Poll::new().map_err(ServerError::Poll)?;
            let ServerConfig { threads, capacity, .. } = ctx.config;
            let pool = ThreadPool::with_logger(threads, capacity, Arc::clone(&ctx.logger))
                .map_err(ServerError::Poll)?;
            Ok((poll, pool))
        };

        self.core.launch(prepare, |listener, (poll, pool), ctx| {
            EventLoop::new(listener, poll, pool, ctx)?.run()
        })
    }

    fn stop(&self) {
        self.core.stop();
    }

    #[inline]
    fn is_running(&self) -> bool {
        self.core.is_running()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }
}

struct EventLoop {
    listener: TcpListener,
    poll: Poll,
    pool: ThreadPool,
    ctx: LoopContext,
    handles: Vec<Option<AsyncContextBuilder>>,
    /// Set when accepting failed before the backlog was drained; the
    /// listener will not report readiness again for those connections.
    accept_retry: bool,
}

impl EventLoop {
    fn new(listener: TcpListener, poll: Poll, pool: ThreadPool, ctx: LoopContext) -> Result<Self, ServerError> {
        let fd = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER, Interest::READABLE)
            .map_err(ServerError::Poll)?;

        Ok(Self {
            listener,
            poll,
            pool,
            ctx,
            handles: (0..MAX_FD).map(|_| None).collect(),
            accept_retry: false,
        })
    }

    fn run(mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(MAX_EVENTS);
        let result = loop {
            if !self.ctx.is_running() {
                break Ok(());
            }
            if let Err(e) = self.turn(&mut events) {
                self.ctx.stop();
                break Err(ServerError::Poll(e));
            }
        };

        for slot in self.handles.iter_mut() {
            if let Some(builder) = slot.take() {
                builder.abort();
            }
        }
        self.pool.shutdown();
        result
    }

    /// Waits for readiness once and handles every reported event.
    fn turn(&mut self, events: &mut Events) -> io::Result<()> {
        let timeout = if self.accept_retry { ACCEPT_RETRY } else { POLL_TIMEOUT };
        match self.poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        if self.accept_retry {
            self.accept_all();
        }
        for event in events.iter() {
            match event.token() {
                LISTENER => self.accept_all(),
                Token(fd) => self.on_readable(fd),
            }
        }
        Ok(())
    }

    fn accept_all(&mut self) {
        self.accept_with(TcpListener::accept);
    }

    /// Accepts until `accept` would block. Any other failure stops the
    /// drain and arms a retry on the next turn.
    fn accept_with<A>(&mut self, mut accept: A)
    where
        A: FnMut(&TcpListener) -> io::Result<(TcpStream, SocketAddr)>,
    {
        self.accept_retry = false;
        loop {
            let (stream, peer) = match accept(&self.listener) {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.ctx.logger.warn(format_args!("Failed to accept connection: {e}"));
                    self.accept_retry = true;
                    return;
                }
            };

            let fd = stream.as_raw_fd();
            let index = fd as usize;
            if index >= MAX_FD {
                self.ctx.logger.warn(format_args!("Server overwhelmed, new connection refused"));
                continue;
            }
            if let Err(e) = stream.set_nonblocking(true) {
                self.ctx.logger.warn(format_args!("Failed to configure connection: {e}"));
                continue;
            }

            let data = AcceptData::new(Some(peer), SocketStream::new(stream));
            let builder = AsyncContextBuilder::new(data, self.ctx.limits);

            match self.poll.registry().register(&mut SourceFd(&fd), Token(index), Interest::READABLE) {
                Ok(()) => self.handles[index] = Some(builder),
                Err(e) => {
                    self.ctx.logger.warn(format_args!("Failed to register connection: {e}"));
                    builder.abort();
                }
            }
        }
    }

    fn on_readable(&mut self, index: usize) {
        let Some(builder) = self.handles.get_mut(index).and_then(Option::as_mut) else {
            return;
        };

        let outcome = match builder.advance() {
            Ok(Progress::Pending) => return,
            Ok(Progress::Complete) => None,
            Err(err) => Some(err),
        };

        let Some(builder) = self.handles[index].take() else {
            return;
        };
        if let Some(fd) = builder.raw_fd() {
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }

        match outcome {
            // Peer went away or the socket failed: nobody to answer.
            Some(ParseError::Read) => builder.abort(),
            error => self.dispatch(builder.finish(error)),
        }
    }

    fn dispatch(&self, http: HttpContext) {
        let ctx = self.ctx.clone();
        if !self.pool.submit(move || ctx.deliver(http)) {
            self.ctx.logger.warn(format_args!("Server overwhelmed, new connection refused"));
        }
    }
}
