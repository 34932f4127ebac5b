use crate::{
    config::{ParserLimits, ServerConfig, ServerKind},
    errors::ServerError,
    log::{Logger, TracingLogger},
    server::{basic::BasicServer, mayhem::MayhemServer, threaded::ThreadedServer},
    HttpContext,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};
use tokio::sync::oneshot;

/// Receives every accepted connection as a ready-to-dispatch context.
///
/// Runs on the engine thread (Basic) or on a pool worker (Threaded,
/// Mayhem); dropping the context closes the connection.
pub type ConnectionCallback = Arc<dyn Fn(HttpContext) + Send + Sync>;

pub(crate) const BACKLOG: i32 = 2048;
pub(crate) const ACCEPT_IDLE: Duration = Duration::from_millis(5);

/// Common contract of the connection engines.
///
/// `stop` only flips a flag; the accept/event loop notices it on its next
/// iteration and the task returned by `start` then completes.
pub trait Server: Send + Sync {
    fn kind(&self) -> ServerKind;

    /// Must be called before [`start`](Self::start).
    fn set_on_connection(&mut self, callback: ConnectionCallback);

    /// Opens the listener and runs the loop on a dedicated thread.
    ///
    /// Startup failures are logged and reported through an already
    /// completed task.
    fn start(&self) -> ServerTask;

    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Bound address, once started.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Builds the engine selected by `config.name`.
pub fn create(config: ServerConfig, logger: Arc<dyn Logger>) -> Box<dyn Server> {
    match config.name {
        ServerKind::Basic => Box::new(BasicServer::with_logger(config, logger)),
        ServerKind::Threaded => Box::new(ThreadedServer::with_logger(config, logger)),
        ServerKind::Mayhem => Box::new(MayhemServer::with_logger(config, logger)),
    }
}

// TASK

/// Completion handle of a running engine loop.
///
/// Await it with [`wait`](Self::wait) from async code, or block on it
/// with [`join`](Self::join).
#[derive(Debug)]
pub struct ServerTask {
    state: TaskState,
}

#[derive(Debug)]
enum TaskState {
    Running(oneshot::Receiver<Result<(), ServerError>>),
    Completed(Option<ServerError>),
}

impl ServerTask {
    pub(crate) fn running(rx: oneshot::Receiver<Result<(), ServerError>>) -> Self {
        Self {
            state: TaskState::Running(rx),
        }
    }

    /// A task that has already finished, typically because startup failed.
    pub fn completed(error: Option<ServerError>) -> Self {
        Self {
            state: TaskState::Completed(error),
        }
    }

    /// `true` if the task finished before it was ever awaited.
    pub fn is_completed(&self) -> bool {
        matches!(self.state, TaskState::Completed(_))
    }

    /// Startup error of an already completed task.
    pub fn error(&self) -> Option<&ServerError> {
        match &self.state {
            TaskState::Completed(error) => error.as_ref(),
            TaskState::Running(_) => None,
        }
    }

    pub async fn wait(self) -> Result<(), ServerError> {
        match self.state {
            TaskState::Completed(None) => Ok(()),
            TaskState::Completed(Some(err)) => Err(err),
            TaskState::Running(rx) => rx.await.unwrap_or(Ok(())),
        }
    }

    /// Blocking variant of [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// Panics when called on a still running task from inside an async
    /// runtime (for example within `Runtime::block_on`); use
    /// [`wait`](Self::wait) there instead.
    pub fn join(self) -> Result<(), ServerError> {
        match self.state {
            TaskState::Completed(None) => Ok(()),
            TaskState::Completed(Some(err)) => Err(err),
            TaskState::Running(rx) => rx.blocking_recv().unwrap_or(Ok(())),
        }
    }
}

// SHARED STATE

/// What an engine loop needs from its server, cloned onto the loop thread.
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub(crate) kind: ServerKind,
    pub(crate) config: ServerConfig,
    pub(crate) limits: ParserLimits,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) callback: ConnectionCallback,
    pub(crate) logger: Arc<dyn Logger>,
}

impl LoopContext {
    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stamps the `Server` header and hands the context to the callback.
    pub(crate) fn deliver(&self, mut ctx: HttpContext) {
        ctx.response.header("Server", self.kind.as_str());
        (self.callback)(ctx);
    }
}

/// State and lifecycle shared by the three engines.
pub(crate) struct ServerCore {
    kind: ServerKind,
    config: ServerConfig,
    limits: ParserLimits,
    running: Arc<AtomicBool>,
    callback: Option<ConnectionCallback>,
    logger: Arc<dyn Logger>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ServerCore {
    pub(crate) fn new(kind: ServerKind, config: ServerConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            kind,
            config: ServerConfig { name: kind, ..config }.normalized(),
            limits: ParserLimits::default(),
            running: Arc::new(AtomicBool::new(false)),
            callback: None,
            logger,
            local_addr: Mutex::new(None),
        }
    }

    pub(crate) fn default_logger() -> Arc<dyn Logger> {
        TracingLogger::shared("server")
    }

    #[inline]
    pub(crate) fn kind(&self) -> ServerKind {
        self.kind
    }

    pub(crate) fn set_limits(&mut self, limits: ParserLimits) {
        self.limits = limits;
    }

    pub(crate) fn set_on_connection(&mut self, callback: ConnectionCallback) {
        self.callback = Some(callback);
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validates, binds and spawns `run` on a dedicated thread.
    ///
    /// `prepare` runs on the calling thread after the listener is bound so
    /// engine-specific setup failures (e.g. creating the poller) are
    /// reported synchronously like a bind failure.
    pub(crate) fn launch<P, S, F>(&self, prepare: P, run: F) -> ServerTask
    where
        P: FnOnce(&LoopContext) -> Result<S, ServerError>,
        S: Send + 'static,
        F: FnOnce(TcpListener, S, LoopContext) -> Result<(), ServerError> + Send + 'static,
    {
        let log = &self.logger;

        if self.is_running() {
            log.warn(format_args!("Server is already running"));
            return ServerTask::completed(Some(ServerError::AlreadyRunning));
        }
        let Some(callback) = self.callback.clone() else {
            log.error(format_args!("OnConnection callback is not set"));
            return ServerTask::completed(Some(ServerError::NoCallback));
        };

        let port = self.config.port;
        let listener = match open_listener(port) {
            Ok(listener) => listener,
            Err(source) => {
                log.error(format_args!("Failed to listen on port {port}: {source}"));
                return ServerTask::completed(Some(ServerError::Bind { port, source }));
            }
        };
        let addr = listener.local_addr().ok();
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = addr;

        let ctx = LoopContext {
            kind: self.kind,
            config: self.config.clone(),
            limits: self.limits,
            running: Arc::clone(&self.running),
            callback,
            logger: Arc::clone(&self.logger),
        };

        let state = match prepare(&ctx) {
            Ok(state) => state,
            Err(err) => {
                log.error(format_args!("{} server failed to start: {err}", self.kind));
                return ServerTask::completed(Some(err));
            }
        };

        self.running.store(true, Ordering::Release);
        log.info(format_args!(
            "Starting {} server on port {}",
            self.kind,
            addr.map_or(port, |a| a.port())
        ));

        let (tx, rx) = oneshot::channel();
        let spawned = thread::Builder::new()
            .name(format!("trio-{}", self.kind.as_str().to_ascii_lowercase()))
            .spawn(move || {
                let logger = Arc::clone(&ctx.logger);
                let kind = ctx.kind;
                let running = Arc::clone(&ctx.running);

                let result = run(listener, state, ctx);
                running.store(false, Ordering::Release);
                if let Err(err) = &result {
                    logger.error(format_args!("{kind} server stopped: {err}"));
                }
                logger.info(format_args!("{kind} server shut down"));
                let _ = tx.send(result);
            });

        match spawned {
            Ok(_) => ServerTask::running(rx),
            Err(err) => {
                self.stop();
                log.error(format_args!("Failed to spawn {} server thread: {err}", self.kind));
                ServerTask::completed(Some(ServerError::Poll(err)))
            }
        }
    }
}

/// Non-blocking listener on `0.0.0.0:port` with `SO_REUSEADDR`.
pub(crate) fn open_listener(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.listen(BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Polls a non-blocking listener until a connection arrives or the loop
/// is asked to stop. `None` means stop.
///
/// Accept failures are logged and retried after [`ACCEPT_IDLE`], so a
/// persistent one (`EMFILE`) does not spin.
pub(crate) fn accept_blocking(listener: &TcpListener, ctx: &LoopContext) -> Option<(TcpStream, SocketAddr)> {
    accept_next(ctx, || listener.accept())
}

fn accept_next<A>(ctx: &LoopContext, mut accept: A) -> Option<(TcpStream, SocketAddr)>
where
    A: FnMut() -> io::Result<(TcpStream, SocketAddr)>,
{
    while ctx.is_running() {
        match accept() {
            Ok((stream, peer)) => match stream.set_nonblocking(false) {
                Ok(()) => return Some((stream, peer)),
                Err(e) => ctx.logger.warn(format_args!("Failed to configure connection: {e}")),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                ctx.logger.warn(format_args!("Failed to accept connection: {e}"));
                thread::sleep(ACCEPT_IDLE);
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{log::tests::MemoryLogger, tools};
    use std::{
        io::{Read, Write},
        time::Instant,
    };

    /// Sends `raw` to the engine, half-closes, and reads until EOF.
    pub(crate) fn round_trip(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(raw).unwrap();
        let _ = stream.shutdown(std::net::Shutdown::Write);

        let mut out = String::new();
        let _ = stream.read_to_string(&mut out);
        out
    }

    pub(crate) fn echo_callback() -> ConnectionCallback {
        Arc::new(|mut ctx: HttpContext| {
            let body = format!("{} {}", ctx.request.method(), ctx.request.path());
            ctx.response.body(body);
            let _ = ctx.write_response();
        })
    }

    pub(crate) fn loop_context(logger: Arc<dyn Logger>) -> LoopContext {
        LoopContext {
            kind: ServerKind::Basic,
            config: ephemeral(ServerKind::Basic),
            limits: ParserLimits::default(),
            running: Arc::new(AtomicBool::new(true)),
            callback: echo_callback(),
            logger,
        }
    }

    pub(crate) fn ephemeral(kind: ServerKind) -> ServerConfig {
        ServerConfig {
            name: kind,
            port: 0,
            threads: 2,
            capacity: 16,
        }
    }

    #[test]
    fn create_picks_engine() {
        for kind in [ServerKind::Basic, ServerKind::Threaded, ServerKind::Mayhem] {
            let server = create(ephemeral(kind), Arc::new(MemoryLogger::default()));
            assert_eq!(server.kind(), kind);
            assert!(!server.is_running());
        }
    }

    #[test]
    fn start_without_callback_fails_fast() {
        let logger = Arc::new(MemoryLogger::default());
        let server = create(ephemeral(ServerKind::Basic), logger.clone());

        let task = server.start();
        assert!(task.is_completed());
        assert!(matches!(task.error(), Some(ServerError::NoCallback)));
        assert!(logger.contains(tracing::Level::ERROR, "OnConnection callback is not set"));
        assert!(matches!(task.join(), Err(ServerError::NoCallback)));
    }

    #[test]
    fn bind_failure_returns_completed_task() {
        let taken = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let logger = Arc::new(MemoryLogger::default());
        let mut server = create(ServerConfig { port, ..ephemeral(ServerKind::Threaded) }, logger.clone());
        server.set_on_connection(echo_callback());

        let task = server.start();
        assert!(matches!(task.error(), Some(ServerError::Bind { .. })));
        assert!(logger.contains(tracing::Level::ERROR, "Failed to listen on port"));
        assert!(!server.is_running());
    }

    #[test]
    fn every_engine_serves_and_stops() {
        for kind in [ServerKind::Basic, ServerKind::Threaded, ServerKind::Mayhem] {
            let logger = Arc::new(MemoryLogger::default());
            let mut server = create(ephemeral(kind), logger.clone());
            server.set_on_connection(echo_callback());

            let task = server.start();
            assert!(!task.is_completed(), "{kind}");
            assert!(server.is_running());
            assert!(logger.contains(tracing::Level::INFO, &format!("Starting {kind} server")));

            let again = server.start();
            assert!(matches!(again.error(), Some(ServerError::AlreadyRunning)));

            let addr = server.local_addr().unwrap();
            let reply = round_trip(addr, tools::GET_REQUEST.as_bytes());
            assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{kind}: {reply:?}");
            assert!(reply.contains(&format!("Server: {kind}\r\n")), "{kind}: {reply:?}");
            assert!(reply.ends_with("GET /some/resource"), "{kind}: {reply:?}");

            server.stop();
            assert!(task.join().is_ok());
            assert!(!server.is_running());
            assert!(logger.contains(tracing::Level::INFO, &format!("{kind} server shut down")));
        }
    }

    #[test]
    fn persistent_accept_error_backs_off() {
        let logger = Arc::new(MemoryLogger::default());
        let ctx = loop_context(logger.clone());
        let started = Instant::now();
        let mut calls = 0;

        let accepted = accept_next(&ctx, || {
            calls += 1;
            if calls == 4 {
                ctx.stop();
            }
            // EMFILE
            Err(io::Error::from_raw_os_error(24))
        });

        assert!(accepted.is_none());
        assert_eq!(calls, 4);
        assert!(started.elapsed() >= ACCEPT_IDLE * 4);
        assert!(logger.contains(tracing::Level::WARN, "Failed to accept connection"));
    }

    #[test]
    #[should_panic]
    fn join_inside_runtime_panics() {
        let (_tx, rx) = oneshot::channel();
        let task = ServerTask::running(rx);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

        rt.block_on(async move {
            let _ = task.join();
        });
    }

    #[test]
    fn completed_task_joins_inside_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let result = rt.block_on(async { ServerTask::completed(None).join() });
        assert!(result.is_ok());
    }
}
