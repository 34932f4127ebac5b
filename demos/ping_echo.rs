use serde_json::json;
use std::env;
use trio_http::{HandlerError, HttpContext, ServerConfig, ServerKind, StatusCode, WebHostBuilder};

fn ping(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
    tracing::info!("Ping request received:\n-----\n{}\n-----", ctx.request);
    ctx.response.text("pong");
    Ok(StatusCode::OK)
}

fn echo(ctx: &mut HttpContext) -> Result<StatusCode, HandlerError> {
    tracing::info!("Echo request received:\n-----\n{}\n-----", ctx.request);
    let reply = json!({ "status": "ok", "message": ctx.request.text() });
    ctx.response.json(&reply)?;
    Ok(StatusCode::OK)
}

// cargo run --example ping_echo -- mayhem 8080
fn main() {
    trio_http::init_tracing();

    let mut args = env::args().skip(1);
    let name = match args.next().map(|s| s.parse::<ServerKind>()).transpose() {
        Ok(name) => name.unwrap_or(ServerKind::Mayhem),
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };
    let port = args.next().and_then(|s| s.parse().ok()).unwrap_or(5000);

    let result = WebHostBuilder::new()
        .config(ServerConfig {
            name,
            port,
            ..ServerConfig::default()
        })
        .get("/ping", ping)
        .post("/echo", echo)
        .build()
        .run();

    if let Err(err) = result {
        eprintln!("{err}");
    }
}
