use std::net::TcpListener;

use anyhow::{Context as _, Error};
use courier::World;
use courier_http::{HttpConfig, Request, Response, Router};
use courier_mio::{CompletionPool, Registry};
use tracing::{event, Level};

/// Serves a few routes on the address given as the first argument.
fn main() -> Result<(), Error> {
    devutils::init_logging();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1234".to_string());
    let listener = TcpListener::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;

    let mut world = World::default();
    let registry = Registry::new()?;

    let mut router = Router::new()
        .route("/", |_| Ok(Response::html(200, PAGE)))
        .route("/hello", hello)
        .route("/echo", |request: &Request| {
            Ok(Response::new(200).with_body("application/octet-stream", request.body().clone()))
        });
    let http_events = courier_http::serve_fn(&mut world, move |request| router.handle(request))?;

    let config = HttpConfig::default().server_name("courier");
    let pool = CompletionPool::new(config.buffer_size);
    let (_actions, info) = courier_http::listen(
        &mut world,
        registry.clone(),
        listener,
        pool,
        config,
        http_events,
    )?;
    event!(Level::INFO, addr = ?info.local_addr, "open http://{}/", info.local_addr);

    courier_mio::run_event_loop(&mut world, &registry)?;

    Ok(())
}

fn hello(request: &Request) -> Result<Response, Error> {
    let name = request
        .query()
        .and_then(|query| query.split('&').find_map(|pair| pair.strip_prefix("name=")))
        .unwrap_or("world");

    Ok(Response::text(200, format!("Hello, {}!", name)).compress())
}

const PAGE: &str = "<!DOCTYPE html><html><body><h1>Hello, World!</h1></body></html>";
