use trio_http::{HandlerError, HttpContext, ServerConfig, ServerKind, StatusCode, WebHostBuilder};

fn hello(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
    ctx.response.text("Hello, world!");
    Ok(StatusCode::OK)
}

fn main() {
    trio_http::init_tracing();

    let host = WebHostBuilder::new()
        .config(ServerConfig {
            name: ServerKind::Basic,
            port: 8080,
            ..ServerConfig::default()
        })
        .get("/", hello)
        .build();

    if let Err(err) = host.run() {
        eprintln!("{err}");
    }
}
