use crate::{errors::HandlerError, HttpContext, StatusCode};

/// Request handler bound to a route or to an error status.
///
/// The returned status decides what happens next: `200 OK` means the
/// handler produced the response itself, anything else sends the context
/// through the error handler registered for that status. An `Err` (or a
/// panic) is treated as `500 Internal Server Error`.
///
/// Any closure with the right signature is a handler:
///
/// ```
/// use trio_http::{Handler, HttpContext, HandlerError, StatusCode};
///
/// fn hello(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
///     ctx.response.text("Hello!");
///     Ok(StatusCode::OK)
/// }
///
/// fn assert_handler<H: Handler>(_: H) {}
/// assert_handler(hello);
/// assert_handler(|_: &mut HttpContext| -> Result<StatusCode, HandlerError> {
///     Ok(StatusCode::NOT_FOUND)
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: &mut HttpContext) -> Result<StatusCode, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&mut HttpContext) -> Result<StatusCode, HandlerError> + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
        self(ctx)
    }
}

/// Plain-text page carrying `status` and its description.
pub fn status_page(status: StatusCode) -> impl Handler {
    move |ctx: &mut HttpContext| -> Result<StatusCode, HandlerError> {
        ctx.response.status(status).text(status.description());
        Ok(status)
    }
}

/// Statuses covered by `RequestDispatcher::with_default_error_handlers`.
pub(crate) const DEFAULT_ERROR_STATUSES: [StatusCode; 4] = [
    StatusCode::BAD_REQUEST,
    StatusCode::NOT_FOUND,
    StatusCode::METHOD_NOT_ALLOWED,
    StatusCode::INTERNAL_SERVER_ERROR,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::stream::MemoryStream, HttpRequest};

    #[test]
    fn status_page_body_is_description() {
        #[rustfmt::skip]
        let cases = [
            (StatusCode::BAD_REQUEST,           "Bad Request"),
            (StatusCode::NOT_FOUND,             "Not Found"),
            (StatusCode::METHOD_NOT_ALLOWED,    "Method Not Allowed"),
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        ];

        for (status, body) in cases {
            let mut ctx = HttpContext::new(HttpRequest::new(), Box::new(MemoryStream::new("")));
            assert_eq!(status_page(status).handle(&mut ctx).unwrap(), status);
            assert_eq!(ctx.response.status_code(), status);
            assert_eq!(ctx.response.get_body(), body.as_bytes());
            assert_eq!(ctx.response.content_type(), "text/plain");
        }
    }
}
