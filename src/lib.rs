//! trio_http - Embeddable HTTP/1.1 server engine with three connection models
//!
//! One request per connection: a request is read and parsed, routed to a
//! handler, answered, and the socket is closed.
//!
//! # Connection engines
//!
//! - **Basic**: one thread accepts, parses and dispatches every connection
//!   in turn. Simplest, fully serialized.
//! - **Threaded**: one thread accepts; parsing and dispatch run on a
//!   work-stealing [`ThreadPool`]. A full pool refuses the connection.
//! - **Mayhem**: readiness-driven (epoll via `mio`). Requests are parsed
//!   incrementally as bytes arrive, so slow clients never block others;
//!   complete requests are dispatched on the pool.
//!
//! # Building blocks
//!
//! - [`BlockingParser`] and [`RequestParser`] turn bytes into an
//!   [`HttpRequest`]; both agree on every valid and invalid input.
//! - [`BoundedQueue`] is the lock-free MPMC queue behind each pool worker.
//! - [`RequestDispatcher`] maps `(path, method)` to a [`Handler`] and
//!   statuses to error handlers.
//! - [`WebHost`] wires an engine to a dispatcher and stops on `SIGINT`
//!   or a [`ShutdownSignal`].
//!
//! # Examples
//!
//! ```no_run
//! use trio_http::{HandlerError, HttpContext, StatusCode, WebHostBuilder};
//!
//! fn hello(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
//!     ctx.response.text("Hello World!");
//!     Ok(StatusCode::OK)
//! }
//!
//! fn main() {
//!     WebHostBuilder::new().get("/", hello).build().run().unwrap();
//! }
//! ```
//!
//! Driving an engine directly:
//! ```no_run
//! use std::sync::Arc;
//! use trio_http::{HttpContext, Server, ServerConfig, ServerKind, ThreadedServer};
//!
//! let mut server = ThreadedServer::new(ServerConfig {
//!     name: ServerKind::Threaded,
//!     port: 8080,
//!     ..ServerConfig::default()
//! });
//! server.set_on_connection(Arc::new(|mut ctx: HttpContext| {
//!     ctx.response.body(ctx.request.path().to_owned());
//!     let _ = ctx.write_response();
//! }));
//!
//! server.start().join().unwrap();
//! ```

pub(crate) mod http {
    pub(crate) mod context;
    pub(crate) mod parser;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod io {
    pub(crate) mod reader;
    pub(crate) mod stream;
    pub(crate) mod writer;
}
pub(crate) mod sync {
    pub(crate) mod pool;
    pub(crate) mod queue;
}
pub(crate) mod server {
    pub(crate) mod basic;
    pub(crate) mod engine;
    pub(crate) mod mayhem;
    pub(crate) mod threaded;
}
pub(crate) mod dispatch {
    pub(crate) mod dispatcher;
    pub(crate) mod handlers;
}
pub mod config;
pub mod errors;
pub(crate) mod host;
pub mod log;

pub use crate::{
    config::{ParserLimits, ServerConfig, ServerKind},
    dispatch::{
        dispatcher::RequestDispatcher,
        handlers::{status_page, Handler},
    },
    errors::{HandlerError, ParseError, ServerError},
    host::{ShutdownSignal, WebHost, WebHostBuilder},
    http::{
        context::{AcceptData, AsyncContextBuilder, HttpContext},
        parser::{Progress, RequestParser, State},
        request::{BlockingParser, HttpRequest},
        response::{
            write::{BodyWriter, WriteBuffer},
            HttpResponse,
        },
        types::{address_to_host, clean_path, Method, StatusCode},
    },
    io::{
        reader::{ReadByte, StreamReader},
        stream::{ByteStream, MemoryStream, SocketStream},
        writer::StreamWriter,
    },
    log::{init_tracing, Logger, NullLogger, TracingLogger},
    server::{
        basic::BasicServer,
        engine::{create, ConnectionCallback, Server, ServerTask},
        mayhem::{MayhemServer, MAX_EVENTS, MAX_FD},
        threaded::ThreadedServer,
    },
    sync::{
        pool::{Task, ThreadPool},
        queue::BoundedQueue,
    },
};
