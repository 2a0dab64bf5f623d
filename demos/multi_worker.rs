use std::{net::TcpListener, thread};

use anyhow::{anyhow, Context as _, Error};
use courier::World;
use courier_http::{HttpConfig, Response};
use courier_mio::{CompletionPool, Registry};
use tracing::{event, Level};

/// Accepts on one socket from several worker threads, each running its own world.
///
/// Usage: `multi_worker [addr] [workers]`
fn main() -> Result<(), Error> {
    devutils::init_logging();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:1234".to_string());
    let workers = match args.next() {
        Some(value) => value.parse().context("invalid worker count")?,
        None => 4,
    };

    let listener = TcpListener::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;
    let config = HttpConfig::default();

    // Descriptors are shared, whichever worker frees one makes it available to all
    let pool = CompletionPool::new(config.buffer_size);

    let mut handles = Vec::new();
    for worker in 0..workers {
        let listener = listener.try_clone()?;
        let pool = pool.clone();
        let config = config.clone();

        let handle = thread::spawn(move || run_worker(worker, listener, pool, config));
        handles.push(handle);
    }
    event!(Level::INFO, workers, %addr, "workers started");

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("worker panicked"))??;
    }

    Ok(())
}

fn run_worker(
    worker: usize,
    listener: TcpListener,
    pool: CompletionPool,
    config: HttpConfig,
) -> Result<(), Error> {
    let mut world = World::default();
    let registry = Registry::new()?;

    let http_events = courier_http::serve_fn(&mut world, move |request| {
        event!(Level::INFO, worker, path = request.path(), "handling request");
        Ok(Response::text(200, format!("Hello from worker {}\n", worker)))
    })?;
    let (_actions, _info) =
        courier_http::listen(&mut world, registry.clone(), listener, pool, config, http_events)?;

    courier_mio::run_event_loop(&mut world, &registry)
}
