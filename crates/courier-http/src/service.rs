use anyhow::Error;
use courier::{
    message::{Mailbox, Sender},
    Actor, Metadata, World,
};
use courier_mio::net::tcp;
use tracing::{event, Level};

use crate::{
    message::reason_phrase, HttpEvent, Request, RequestAction, RequestEvent, Respond, Response,
};

/// Start an actor answering every request with `handler`.
///
/// Returning `Err(Respond(..))` from the handler sends that response as-is, any other error is
/// answered with a `500` and closes the connection. Upgraded connections are closed, use a
/// dedicated actor to accept WebSockets.
pub fn serve_fn<F>(world: &mut World, handler: F) -> Result<Sender<HttpEvent>, Error>
where
    F: FnMut(&Request) -> Result<Response, Error> + 'static,
{
    let actor = ServeFn {
        events: Mailbox::default(),
        handler,
    };
    let sender = actor.events.sender();
    world.insert("http-serve-fn", actor)?;

    Ok(sender)
}

struct ServeFn<F> {
    events: Mailbox<HttpEvent>,
    handler: F,
}

impl<F> Actor for ServeFn<F>
where
    F: FnMut(&Request) -> Result<Response, Error> + 'static,
{
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        self.events.set_signal(world.signal(meta.id()))?;
        Ok(())
    }

    fn process(&mut self, _world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        while let Some(event) = self.events.recv() {
            match event {
                HttpEvent::Request(event) => self.on_request(event),
                HttpEvent::Upgraded(event) => {
                    event!(Level::WARN, path = event.request.path(), "no upgrade handler");
                    let _ = event.actions.send(tcp::StreamAction::Close);
                }
            }
        }

        if self.events.is_orphaned() {
            event!(Level::DEBUG, "all servers gone, stopping");
            meta.set_stop();
        }

        Ok(())
    }
}

impl<F> ServeFn<F>
where
    F: FnMut(&Request) -> Result<Response, Error>,
{
    fn on_request(&mut self, event: RequestEvent) {
        let RequestEvent { request, actions } = event;

        let action = match (self.handler)(&request) {
            Ok(response) => RequestAction::Respond(response),
            Err(error) => RequestAction::Fail(error),
        };

        // The connection may have gone away in the meantime
        if actions.send(action).is_err() {
            event!(Level::DEBUG, "connection gone before response");
        }
    }
}

type Handler = Box<dyn FnMut(&Request) -> Result<Response, Error>>;

/// Dispatches requests to handlers by exact path.
pub struct Router {
    routes: Vec<(String, Handler)>,
    fallback: Handler,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: Box::new(|_: &Request| {
                Err(Respond(Response::error(404, reason_phrase(404))).into())
            }),
        }
    }

    /// Add a handler for `path`, replacing an earlier one for the same path.
    pub fn route<F>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&Request) -> Result<Response, Error> + 'static,
    {
        let path = path.into();
        self.routes.retain(|(existing, _)| *existing != path);
        self.routes.push((path, Box::new(handler)));
        self
    }

    /// Set the handler for requests no route matches, `404 Not Found` by default.
    pub fn fallback<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Request) -> Result<Response, Error> + 'static,
    {
        self.fallback = Box::new(handler);
        self
    }

    pub fn handle(&mut self, request: &Request) -> Result<Response, Error> {
        let path = request.path();

        let route = self
            .routes
            .iter_mut()
            .find(|(route, _)| route == path)
            .map(|(_, handler)| handler);

        match route {
            Some(handler) => handler(request),
            None => (self.fallback)(request),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{HeadParser, RequestLine},
        Framer,
    };

    fn request(target: &str) -> Request {
        let mut framer = Framer::new(1024);
        framer.fill(format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", target).as_bytes());

        let head = HeadParser::<RequestLine>::new()
            .parse(&mut framer)
            .unwrap()
            .unwrap();
        Request::new(head)
    }

    #[test]
    fn routes_by_path_ignoring_query() {
        let mut router = Router::new()
            .route("/", |_| Ok(Response::text(200, "root")))
            .route("/hello", |_| Ok(Response::text(200, "hello")));

        let response = router.handle(&request("/hello?name=world")).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("content-length"), Some("5"));

        let response = router.handle(&request("/")).unwrap();
        assert_eq!(response.headers().get("content-length"), Some("4"));
    }

    #[test]
    fn unknown_path_is_not_found() {
        let mut router = Router::new().route("/", |_| Ok(Response::text(200, "root")));

        let error = router.handle(&request("/missing")).unwrap_err();
        let Respond(response) = error.downcast::<Respond>().unwrap();
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn fallback_replaces_not_found() {
        let mut router = Router::new().fallback(|_| Ok(Response::redirect("/")));

        let response = router.handle(&request("/anything")).unwrap();
        assert_eq!(response.status(), 302);
        assert_eq!(response.headers().get("location"), Some("/"));
    }

    #[test]
    fn later_route_replaces_earlier() {
        let mut router = Router::new()
            .route("/", |_| Ok(Response::text(200, "first")))
            .route("/", |_| Ok(Response::text(201, "second")));

        let response = router.handle(&request("/")).unwrap();
        assert_eq!(response.status(), 201);
    }
}
