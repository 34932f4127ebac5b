use crate::{
    config::{ParserLimits, ServerConfig, ServerKind},
    errors::ServerError,
    http::context::{AcceptData, HttpContext},
    io::stream::SocketStream,
    log::Logger,
    server::engine::{self, ConnectionCallback, Server, ServerCore, ServerTask},
    sync::pool::ThreadPool,
    BlockingParser,
};
use std::{net::SocketAddr, sync::Arc};

/// Accepts on the server thread and hands each connection, still unread,
/// to a worker pool that parses and dispatches it.
///
/// When the chosen worker's queue is full the connection is closed
/// immediately instead of waiting for room.
pub struct ThreadedServer {
    core: ServerCore,
}

impl ThreadedServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_logger(config, ServerCore::default_logger())
    }

    pub fn with_logger(config: ServerConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            core: ServerCore::new(ServerKind::Threaded, config, logger),
        }
    }

    pub fn set_limits(&mut self, limits: ParserLimits) {
        self.core.set_limits(limits);
    }
}

impl Server for ThreadedServer {
    #[inline]
    fn kind(&self) -> ServerKind {
        self.core.kind()
    }

    fn set_on_connection(&mut self, callback: ConnectionCallback) {
        self.core.set_on_connection(callback);
    }

    fn start(&self) -> ServerTask {
        let prepare = |ctx: &engine::LoopContext| {
            let ServerConfig { threads, capacity, .. } = ctx.config;
            ThreadPool::with_logger(threads, capacity, Arc::clone(&ctx.logger)).map_err(ServerError::Poll)
        };

        self.core.launch(prepare, |listener, mut pool, ctx| {
            let parser = Arc::new(BlockingParser::new(ctx.limits));

            while let Some((stream, peer)) = engine::accept_blocking(&listener, &ctx) {
                let stream = SocketStream::new(stream);
                let (worker_ctx, parser) = (ctx.clone(), Arc::clone(&parser));

                // A rejected task is dropped along with the stream it owns,
                // which closes the connection.
                let accepted = pool.submit(move || {
                    let data = AcceptData::new(Some(peer), stream);
                    worker_ctx.deliver(HttpContext::receive(data, &parser));
                });
                if !accepted {
                    ctx.logger.warn(format_args!("Server overwhelmed, new connection refused"));
                }
            }

            pool.shutdown();
            Ok(())
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
