use crate::{
    config::{ParserLimits, ServerConfig, ServerKind},
    http::context::{AcceptData, HttpContext},
    io::stream::SocketStream,
    log::Logger,
    server::engine::{self, ConnectionCallback, Server, ServerCore, ServerTask},
    BlockingParser,
};
use std::{net::SocketAddr, sync::Arc};

/// Single-threaded engine: accept, parse and dispatch one connection at a
/// time on the server thread.
pub struct BasicServer {
    core: ServerCore,
}

impl BasicServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_logger(config, ServerCore::default_logger())
    }

    pub fn with_logger(config: ServerConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            core: ServerCore::new(ServerKind::Basic, config, logger),
        }
    }

    pub fn set_limits(&mut self, limits: ParserLimits) {
        self.core.set_limits(limits);
    }
}

impl Server for BasicServer {
    #[inline]
    fn kind(&self) -> ServerKind {
        self.core.kind()
    }

    fn set_on_connection(&mut self, callback: ConnectionCallback) {
        self.core.set_on_connection(callback);
    }

    fn start(&self) -> ServerTask {
        self.core.launch(|_| Ok(()), |listener, (), ctx| {
            let parser = BlockingParser::new(ctx.limits);

            while let Some((stream, peer)) = engine::accept_blocking(&listener, &ctx) {
                let data = AcceptData::new(Some(peer), SocketStream::new(stream));
                ctx.deliver(HttpContext::receive(data, &parser));
            }
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
