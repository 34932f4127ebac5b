use crate::{
    dispatch::handlers::{self, Handler},
    log::{Logger, NullLogger},
    sync::pool::panic_message,
    http::types::clean_path,
    HttpContext, Method, StatusCode,
};
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// Routing table plus error-handler table.
///
/// Registration happens during setup through `&mut self`; once the
/// dispatcher is shared (usually behind an `Arc`) it is only read.
pub struct RequestDispatcher {
    routes: HashMap<String, HashMap<Method, Arc<dyn Handler>>>,
    error_handlers: HashMap<StatusCode, Arc<dyn Handler>>,
    logger: Arc<dyn Logger>,
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestDispatcher {
    pub fn new() -> Self {
        Self::with_logger(Arc::new(NullLogger))
    }

    pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
        Self {
            routes: HashMap::new(),
            error_handlers: HashMap::new(),
            logger,
        }
    }

    pub(crate) fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = logger;
    }

    /// Registers a plain-text page for 400, 404, 405 and 500 whose body is
    /// the status description.
    pub fn with_default_error_handlers(mut self) -> Self {
        for status in handlers::DEFAULT_ERROR_STATUSES {
            self.register_error_handler(status, handlers::status_page(status));
        }
        self
    }

    /// Binds `handler` to `method` on the cleaned `path`.
    ///
    /// Returns `false` and keeps the existing handler if the pair is
    /// already registered.
    pub fn register_handler<H: Handler>(&mut self, path: &str, method: Method, handler: H) -> bool {
        let path = clean_path(path);
        let methods = self.routes.entry(path.clone()).or_default();

        if methods.contains_key(&method) {
            self.logger.warn(format_args!("Handler for '{method} {path}' already registered"));
            return false;
        }
        methods.insert(method, Arc::new(handler));
        self.logger.debug(format_args!("Registered handler for '{method} {path}'"));
        true
    }

    /// Sets the handler for `status`, replacing any previous one.
    pub fn register_error_handler<H: Handler>(&mut self, status: StatusCode, handler: H) {
        if self.error_handlers.insert(status, Arc::new(handler)).is_some() {
            self.logger.warn(format_args!(
                "Handler for status code {} is already registered, replacing it with the new one",
                status.as_u16()
            ));
        }
    }

    /// `true` if a handler exists for `method` on the cleaned `path`.
    pub fn has_route(&self, path: &str, method: Method) -> bool {
        self.routes
            .get(&clean_path(path))
            .is_some_and(|methods| methods.contains_key(&method))
    }

    /// Resolves and runs the handler for `ctx`, writes the response and
    /// closes the connection.
    pub fn dispatch(&self, mut ctx: HttpContext) {
        let path = clean_path(ctx.request.path());
        let method = ctx.request.method();
        self.logger.debug(format_args!("Dispatching request {path}"));

        let status = if let Some(err) = ctx.parse_error() {
            self.logger.warn(format_args!("Rejecting malformed request: {err}"));
            StatusCode::BAD_REQUEST
        } else {
            match self.routes.get(&path).map(|methods| methods.get(&method)) {
                Some(Some(handler)) => self.invoke(handler.as_ref(), &mut ctx, &path),
                Some(None) => {
                    self.logger.warn(format_args!("No handler found for '{method} {path}'"));
                    StatusCode::METHOD_NOT_ALLOWED
                }
                None => {
                    self.logger.warn(format_args!("No handler found for '{method} {path}'"));
                    StatusCode::NOT_FOUND
                }
            }
        };

        if status != StatusCode::OK {
            self.logger.debug(format_args!(
                "Error occurred when handling request {path}: {status}"
            ));
            ctx.response.status(status);

            match self.error_handlers.get(&status) {
                Some(handler) => {
                    self.invoke(handler.as_ref(), &mut ctx, &path);
                }
                None => self.logger.warn(format_args!("No error handler for {status}")),
            }
        }

        if let Err(err) = ctx.write_response() {
            self.logger.debug(format_args!("Failed to write response for {path}: {err}"));
        }
        drop(ctx);
        self.logger.debug(format_args!("Request '{path}' handled"));
    }

    fn invoke(&self, handler: &dyn Handler, ctx: &mut HttpContext, path: &str) -> StatusCode {
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(ctx))) {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                self.logger.error(format_args!("Error occurred when handling request {path}: {err}"));
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Err(payload) => {
                self.logger.error(format_args!(
                    "Handler panicked when handling request {path}: {}",
                    panic_message(payload.as_ref())
                ));
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
