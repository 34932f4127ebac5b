//! Host: one engine wired to one dispatcher
//!
//! [`WebHost::run`] starts the engine, then blocks until it stops on its
//! own, the process receives `SIGINT`, or the host's [`ShutdownSignal`]
//! fires. Stopping only ends acceptance; requests already handed to
//! workers finish normally.
//!
//! ```no_run
//! use trio_http::{HttpContext, HandlerError, ServerConfig, ServerKind, StatusCode, WebHostBuilder};
//!
//! fn hello(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
//!     ctx.response.text("Hello World!");
//!     Ok(StatusCode::OK)
//! }
//!
//! fn main() {
//!     trio_http::init_tracing();
//!
//!     let host = WebHostBuilder::new()
//!         .config(ServerConfig {
//!             name: ServerKind::Mayhem,
//!             port: 8080,
//!             ..ServerConfig::default()
//!         })
//!         .get("/", hello)
//!         .build();
//!
//!     if let Err(err) = host.run() {
//!         eprintln!("{err}");
//!     }
//! }
//! ```

use crate::{
    config::ServerConfig,
    dispatch::handlers::Handler,
    errors::ServerError,
    log::{Logger, TracingLogger},
    server::engine::{self, Server},
    Method, RequestDispatcher, StatusCode,
};
use std::{future, net::SocketAddr, sync::Arc};
use tokio::{runtime, sync::watch};

/// Cloneable trigger that asks a running [`WebHost`] to stop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return future::pending().await;
            }
        }
    }
}

pub struct WebHost {
    server: Box<dyn Server>,
    shutdown: ShutdownSignal,
    handle_interrupt: bool,
    logger: Arc<dyn Logger>,
}

impl WebHost {
    #[inline]
    pub fn builder() -> WebHostBuilder {
        WebHostBuilder::new()
    }

    #[inline]
    pub fn server(&self) -> &dyn Server {
        self.server.as_ref()
    }

    /// Bound address while running.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    #[inline]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Runs the engine and blocks until it stops.
    ///
    /// Startup failures come back immediately as `Err`; so does a failure
    /// that later stops the engine on its own.
    pub fn run(&self) -> Result<(), ServerError> {
        self.logger.info(format_args!("Starting web host"));

        let task = self.server.start();
        if task.is_completed() {
            return task.join();
        }

        let rt = match runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                self.server.stop();
                let _ = task.join();
                return Err(ServerError::Runtime(err));
            }
        };

        let result = rt.block_on(async {
            let wait = task.wait();
            tokio::pin!(wait);

            tokio::select! {
                result = &mut wait => return result,
                _ = self.interrupted() => {
                    self.logger.warn(format_args!("^C received, stopping"));
                }
                _ = self.shutdown.triggered() => {
                    self.logger.info(format_args!("Shutdown requested, stopping"));
                }
            }

            self.server.stop();
            wait.await
        });

        self.logger.info(format_args!("Web host stopped"));
        result
    }

    async fn interrupted(&self) {
        if !self.handle_interrupt {
            return future::pending().await;
        }
        if let Err(err) = tokio::signal::ctrl_c().await {
            self.logger.error(format_args!("Failed to listen for ^C: {err}"));
            future::pending::<()>().await;
        }
    }
}

/// Collects configuration and routes, then builds a [`WebHost`].
///
/// The default 400/404/405/500 pages are registered up front; calling
/// [`error`](Self::error) for one of those statuses replaces it.
pub struct WebHostBuilder {
    config: ServerConfig,
    logger: Arc<dyn Logger>,
    dispatcher: RequestDispatcher,
    shutdown: ShutdownSignal,
    handle_interrupt: bool,
}

impl Default for WebHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WebHostBuilder {
    pub fn new() -> Self {
        let logger = TracingLogger::shared("host");
        Self {
            config: ServerConfig::default(),
            dispatcher: RequestDispatcher::with_logger(Arc::clone(&logger)).with_default_error_handlers(),
            logger,
            shutdown: ShutdownSignal::new(),
            handle_interrupt: true,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Log sink for the host, its engine and its dispatcher.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.dispatcher.set_logger(Arc::clone(&logger));
        self.logger = logger;
        self
    }

    pub fn shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    /// Whether `SIGINT` stops the host; on by default.
    pub fn handle_interrupt(mut self, enabled: bool) -> Self {
        self.handle_interrupt = enabled;
        self
    }

    pub fn route<H: Handler>(mut self, path: &str, method: Method, handler: H) -> Self {
        self.dispatcher.register_handler(path, method, handler);
        self
    }

    #[inline]
    pub fn get<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, Method::Get, handler)
    }

    #[inline]
    pub fn post<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, Method::Post, handler)
    }

    #[inline]
    pub fn put<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, Method::Put, handler)
    }

    #[inline]
    pub fn delete<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(path, Method::Delete, handler)
    }

    pub fn error<H: Handler>(mut self, status: StatusCode, handler: H) -> Self {
        self.dispatcher.register_error_handler(status, handler);
        self
    }

    pub fn build(self) -> WebHost {
        let mut server = engine::create(self.config, Arc::clone(&self.logger));
        let dispatcher = Arc::new(self.dispatcher);
        server.set_on_connection(Arc::new(move |ctx| dispatcher.dispatch(ctx)));

        WebHost {
            server,
            shutdown: self.shutdown,
            handle_interrupt: self.handle_interrupt,
            logger: self.logger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ServerKind, errors::HandlerError, log::tests::MemoryLogger, server::engine::tests::round_trip,
        HttpContext,
    };
    use std::{
        net::TcpListener,
        thread,
        time::{Duration, Instant},
    };
    use tracing::Level;

    fn users(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
        let names = ["ana", "bo"];
        ctx.response.json(&names)?;
        Ok(StatusCode::OK)
    }

    fn echo(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
        let value: serde_json::Value = ctx.request.json()?;
        ctx.response.status(StatusCode::CREATED).json(&value)?;
        Ok(StatusCode::OK)
    }

    fn wait_for_addr(host: &WebHost) -> SocketAddr {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(addr) = host.local_addr().filter(|_| host.server().is_running()) {
                return addr;
            }
            assert!(Instant::now() < deadline, "host did not start");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn serves_routes_until_signalled() {
        for kind in [ServerKind::Basic, ServerKind::Threaded, ServerKind::Mayhem] {
            let logger = Arc::new(MemoryLogger::default());
            let signal = ShutdownSignal::new();
            let host = Arc::new(
                WebHostBuilder::new()
                    .config(ServerConfig {
                        name: kind,
                        port: 0,
                        threads: 2,
                        capacity: 16,
                    })
                    .logger(logger.clone())
                    .handle_interrupt(false)
                    .shutdown(signal.clone())
                    .get("/users", users)
                    .post("/echo", echo)
                    .build(),
            );

            let runner = {
                let host = Arc::clone(&host);
                thread::spawn(move || host.run())
            };
            let addr = wait_for_addr(&host);

            #[rustfmt::skip]
            let cases: [(&str, &str, &str); 4] = [
                ("GET /users HTTP/1.1\r\n\r\n",    "200 OK",                 r#"["ana","bo"]"#),
                ("GET /nope HTTP/1.1\r\n\r\n",     "404 Not Found",          "Not Found"),
                ("DELETE /users HTTP/1.1\r\n\r\n", "405 Method Not Allowed", "Method Not Allowed"),
                ("POST /echo HTTP/1.1\r\nContent-Length: 8\r\n\r\n{\"a\": 1}",
                                                   "201 Created",            r#"{"a":1}"#),
            ];
            for (raw, status, body) in cases {
                let reply = round_trip(addr, raw.as_bytes());
                assert!(reply.starts_with(&format!("HTTP/1.1 {status}\r\n")), "{kind}: {reply:?}");
                assert!(reply.ends_with(body), "{kind}: {reply:?}");
            }

            signal.trigger();
            assert!(signal.is_triggered());
            assert!(runner.join().unwrap().is_ok());
            assert!(logger.contains(Level::INFO, "Shutdown requested, stopping"));
            assert!(logger.contains(Level::INFO, "Web host stopped"));
        }
    }

    #[test]
    fn bind_failure_is_returned() {
        let taken = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let host = WebHostBuilder::new()
            .config(ServerConfig { port, ..ServerConfig::default() })
            .logger(Arc::new(MemoryLogger::default()))
            .handle_interrupt(false)
            .build();

        assert!(matches!(host.run(), Err(ServerError::Bind { .. })));
    }

    #[test]
    fn signal_before_run_stops_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let host = WebHostBuilder::new()
            .config(ServerConfig { port: 0, ..ServerConfig::default() })
            .logger(Arc::new(MemoryLogger::default()))
            .handle_interrupt(false)
            .shutdown(signal)
            .build();

        assert!(host.run().is_ok());
        assert!(!host.server().is_running());
    }
}
