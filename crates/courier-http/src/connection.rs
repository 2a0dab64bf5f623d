use std::{net::SocketAddr, rc::Rc};

use anyhow::{Context as _, Error};
use courier::{
    message::{Mailbox, Sender, Signal},
    Actor, Metadata, World,
};
use courier_mio::{net::tcp, Completion, CompletionPool, Descriptor, OperationKind};
use tracing::{event, span, Level};
use uuid::Uuid;

use crate::{
    body::{write_chunked_terminator, BodyReader, BodyWriter, Progress},
    message::{reason_phrase, AcceptEncoding, HeadParser, RequestLine},
    websocket, Framer, HttpConfig, HttpError, HttpEvent, Request, RequestAction, RequestEvent,
    Respond, Response, ResponseBody, UpgradedEvent,
};

pub enum ConnectionEvent {
    Closed,
}

pub enum ConnectionAction {
    Close,
}

/// Open an HTTP connection on an accepted TCP stream.
pub fn open(
    world: &mut World,
    connected: tcp::ConnectedEvent,
    config: Rc<HttpConfig>,
    http_events: Sender<HttpEvent>,
    events: Sender<ConnectionEvent>,
) -> Result<Sender<ConnectionAction>, Error> {
    let actor = Service::new(connected, config, http_events, events);
    let actions = actor.actions.sender();
    world.insert("http-connection", actor)?;

    Ok(actions)
}

struct Service {
    id: Uuid,
    config: Rc<HttpConfig>,
    pool: CompletionPool,
    remote_addr: SocketAddr,
    signal: Option<Signal>,

    actions: Mailbox<ConnectionAction>,
    events: Sender<ConnectionEvent>,
    tcp_events: Mailbox<tcp::StreamEvent>,
    tcp_actions: Sender<tcp::StreamAction>,
    http_events: Sender<HttpEvent>,

    framer: Framer,
    state: State,
    served: usize,
    io_pending: bool,
    io_failed: bool,
    tcp_closing: bool,
    handed_off: bool,
}

enum State {
    AwaitingRequest(HeadParser<RequestLine>),
    ReadingBody {
        request: Request,
        exchange: Exchange,
        reader: BodyReader,
        body: Vec<u8>,
    },
    /// Discarding a body that won't be handled, before answering with `response`.
    Draining {
        exchange: Exchange,
        reader: BodyReader,
        response: Response,
    },
    Dispatching {
        exchange: Exchange,
        actions: Mailbox<RequestAction>,
    },
    Committing(Commit),
    Closed,
}

/// What the connection needs to remember about a request while answering it.
#[derive(Default, Clone, Copy)]
struct Exchange {
    keep_alive: bool,
    http_1_0: bool,
    head_only: bool,
    accept: AcceptEncoding,
}

impl Exchange {
    fn new(request: &Request) -> Self {
        Self {
            keep_alive: request.keep_alive(),
            http_1_0: request.version().eq_ignore_ascii_case("HTTP/1.0"),
            head_only: request.method().eq_ignore_ascii_case("HEAD"),
            accept: request.accept_encoding(),
        }
    }
}

struct Commit {
    writer: BodyWriter,
    body: ResponseBody,
    block: Vec<u8>,
    head_only: bool,
    finished: bool,
    after: After,
}

enum After {
    NextRequest,
    Close,
    Upgrade(Request),
}

enum Flow {
    Continue,
    Wait,
    Close,
    HandOff(Request),
}

impl Service {
    fn new(
        connected: tcp::ConnectedEvent,
        config: Rc<HttpConfig>,
        http_events: Sender<HttpEvent>,
        events: Sender<ConnectionEvent>,
    ) -> Self {
        let id = Uuid::new_v4();
        event!(Level::DEBUG, %id, remote_addr = ?connected.remote_addr, "connection opened");

        let framer = Framer::new(config.buffer_size);

        Self {
            id,
            config,
            pool: connected.pool,
            remote_addr: connected.remote_addr,
            signal: None,

            actions: Mailbox::default(),
            events,
            tcp_events: connected.events,
            tcp_actions: connected.actions,
            http_events,

            framer,
            state: State::AwaitingRequest(HeadParser::new()),
            served: 0,
            io_pending: false,
            io_failed: false,
            tcp_closing: false,
            handed_off: false,
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        event!(Level::DEBUG, id = %self.id, "connection closed");

        let _ = self.events.send(ConnectionEvent::Closed);
        if !self.tcp_closing && !self.handed_off {
            let _ = self.tcp_actions.send(tcp::StreamAction::Close);
        }
    }
}

impl Actor for Service {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        let signal = world.signal(meta.id());

        self.tcp_events.set_signal(signal.clone())?;
        self.actions.set_signal(signal.clone())?;

        // Start reading the first request right away
        signal.send()?;
        self.signal = Some(signal);

        Ok(())
    }

    fn process(&mut self, _world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        let span = span!(Level::INFO, "http", id = %self.id);
        let _entered = span.enter();

        if let Some(action) = self.actions.recv() {
            match action {
                ConnectionAction::Close => {
                    event!(Level::DEBUG, "closing on request");
                    self.close(meta)?;
                    return Ok(());
                }
            }
        }

        while let Some(event) = self.tcp_events.recv() {
            match event {
                tcp::StreamEvent::Completed(completion) => self.on_completed(completion),
                tcp::StreamEvent::Closed => {
                    event!(Level::DEBUG, "stream closed");
                    self.tcp_closing = true;
                    self.state = State::Closed;
                }
            }
        }

        if let State::Closed = self.state {
            meta.set_stop();
            return Ok(());
        }

        self.drive(meta)
    }
}

impl Service {
    fn drive(&mut self, meta: &mut Metadata) -> Result<(), Error> {
        loop {
            // Once the socket failed nothing more can be sent on it
            if self.io_failed {
                return self.close(meta);
            }

            // Only one socket operation may be in flight
            if self.io_pending {
                return Ok(());
            }

            let state = std::mem::replace(&mut self.state, State::Closed);
            let flow = match state {
                State::AwaitingRequest(parser) => self.step_awaiting(parser)?,
                State::ReadingBody {
                    request,
                    exchange,
                    reader,
                    body,
                } => self.step_reading(request, exchange, reader, body)?,
                State::Draining {
                    exchange,
                    reader,
                    response,
                } => self.step_draining(exchange, reader, response)?,
                State::Dispatching { exchange, actions } => {
                    self.step_dispatching(exchange, actions)?
                }
                State::Committing(commit) => self.step_committing(commit)?,
                State::Closed => Flow::Close,
            };

            match flow {
                Flow::Continue => continue,
                Flow::Wait => return Ok(()),
                Flow::Close => return self.close(meta),
                Flow::HandOff(request) => return self.hand_off(request, meta),
            }
        }
    }

    fn step_awaiting(&mut self, mut parser: HeadParser<RequestLine>) -> Result<Flow, Error> {
        let head = match parser.parse(&mut self.framer) {
            Ok(Some(head)) => head,
            Ok(None) => {
                self.state = State::AwaitingRequest(parser);
                self.begin_read()?;
                return Ok(Flow::Wait);
            }
            Err(error) => return self.fail(error),
        };

        self.served += 1;

        let mut request = Request::new(head);
        request.set_remote_addr(self.remote_addr);
        event!(
            Level::DEBUG,
            method = request.method(),
            target = request.target(),
            served = self.served,
            "request received"
        );

        let exchange = Exchange::new(&request);
        let reader = match BodyReader::open(request.framing()) {
            Ok(reader) => reader,
            Err(error) => return self.fail(error),
        };

        // Known to be too large up front, don't bother reading it
        let limit = self.config.max_body_size;
        let too_large = request
            .content_length()
            .map_or(false, |length| length > limit as u64);
        if too_large && !request.framing().chunked {
            self.state = too_large_state(exchange, reader, HttpError::BodyTooLarge { limit });
            return Ok(Flow::Continue);
        }

        self.state = State::ReadingBody {
            request,
            exchange,
            reader,
            body: Vec::new(),
        };
        Ok(Flow::Continue)
    }

    fn step_reading(
        &mut self,
        mut request: Request,
        exchange: Exchange,
        mut reader: BodyReader,
        mut body: Vec<u8>,
    ) -> Result<Flow, Error> {
        let limit = self.config.max_body_size;
        let progress = match reader.read_limited(&mut self.framer, &mut body, limit) {
            Ok(progress) => progress,
            Err(error @ HttpError::BodyTooLarge { .. }) => {
                event!(Level::DEBUG, limit, "request body too large");

                // A finished reader drains as done, the rest is skipped undecoded
                self.state = too_large_state(exchange, reader, error);
                return Ok(Flow::Continue);
            }
            Err(error) => return self.fail(error),
        };

        if progress == Progress::Pending {
            self.state = State::ReadingBody {
                request,
                exchange,
                reader,
                body,
            };
            self.begin_read()?;
            return Ok(Flow::Wait);
        }

        event!(Level::TRACE, len = body.len(), "request body read");
        request.set_body(body.into());
        self.dispatch(request, exchange)
    }

    fn step_draining(
        &mut self,
        exchange: Exchange,
        mut reader: BodyReader,
        response: Response,
    ) -> Result<Flow, Error> {
        match reader.drain(&mut self.framer) {
            Ok(Progress::Done) => self.begin_commit(response, exchange, After::NextRequest),
            Ok(Progress::Pending) => {
                self.state = State::Draining {
                    exchange,
                    reader,
                    response,
                };
                self.begin_read()?;
                Ok(Flow::Wait)
            }
            Err(error) => self.fail(error),
        }
    }

    fn dispatch(&mut self, request: Request, exchange: Exchange) -> Result<Flow, Error> {
        if request.is_websocket() && self.config.websocket {
            event!(Level::DEBUG, "websocket upgrade requested");

            return match websocket::handshake_response(&request) {
                Ok(response) => self.begin_commit(response, exchange, After::Upgrade(request)),
                Err(response) => self.begin_commit(response, exchange, After::Close),
            };
        }

        let signal = self.signal.clone().context("connection not registered")?;
        let actions = Mailbox::default();
        actions.set_signal(signal.clone())?;

        let event = RequestEvent {
            request,
            actions: actions.sender(),
        };
        if let Err(error) = self.http_events.send(HttpEvent::Request(event)) {
            event!(Level::ERROR, ?error, "failed to dispatch request");
            let response = Response::error(500, reason_phrase(500));
            return self.begin_commit(response, exchange, After::Close);
        }

        // Check back after the handler had its turn, to notice it dropping the request
        signal.send()?;

        self.state = State::Dispatching { exchange, actions };
        Ok(Flow::Wait)
    }

    fn step_dispatching(
        &mut self,
        exchange: Exchange,
        actions: Mailbox<RequestAction>,
    ) -> Result<Flow, Error> {
        let response = match actions.recv() {
            Some(RequestAction::Respond(response)) => response,
            Some(RequestAction::Fail(error)) => match error.downcast::<Respond>() {
                Ok(Respond(response)) => response,
                Err(error) => {
                    event!(Level::ERROR, "handler failed:\n{:?}", error);
                    let response = Response::error(500, reason_phrase(500));
                    return self.begin_commit(response, exchange, After::Close);
                }
            },
            None if actions.is_orphaned() => {
                event!(Level::ERROR, "handler dropped request without responding");
                let response = Response::error(500, reason_phrase(500));
                return self.begin_commit(response, exchange, After::Close);
            }
            None => {
                self.state = State::Dispatching { exchange, actions };
                return Ok(Flow::Wait);
            }
        };

        self.begin_commit(response, exchange, After::NextRequest)
    }

    /// Commit the response head and start writing it together with the first part of the body.
    fn begin_commit(
        &mut self,
        mut response: Response,
        exchange: Exchange,
        after: After,
    ) -> Result<Flow, Error> {
        let after = match after {
            After::NextRequest => {
                let keep_alive = exchange.keep_alive
                    && response.keep_alive()
                    && self.served < self.config.max_requests_per_connection;

                if !keep_alive {
                    response.set_keep_alive(false);
                    After::Close
                } else {
                    if exchange.http_1_0 {
                        response.set_keep_alive(true);
                    }
                    After::NextRequest
                }
            }
            After::Close => {
                response.set_keep_alive(false);
                After::Close
            }
            after => after,
        };

        if let Some(name) = &self.config.server_name {
            if response.headers().get("server").is_none() {
                response.headers_mut()?.set("Server", name.clone());
            }
        }
        response.negotiate_encoding(exchange.accept);

        let mut descriptor = self.pool.acquire();
        let writer = match response.commit(descriptor.buffer_mut()) {
            Ok(writer) => writer,
            Err(error) => {
                self.pool.release(descriptor);
                event!(Level::ERROR, ?error, "failed to commit response");

                // Nothing has been written yet, so an error response is still possible
                let response = Response::error(500, reason_phrase(500));
                return self.begin_commit(response, Exchange::default(), After::Close);
            }
        };
        event!(Level::DEBUG, status = response.status(), "response committed");

        let mut commit = Commit {
            writer,
            body: response.take_body(),
            block: Vec::new(),
            head_only: exchange.head_only,
            finished: false,
            after,
        };
        if let Err(error) = self.fill_body(&mut commit, &mut descriptor) {
            self.pool.release(descriptor);
            event!(Level::ERROR, ?error, "failed to write response body");
            return Ok(Flow::Close);
        }

        self.begin_write(descriptor)?;
        self.state = State::Committing(commit);
        Ok(Flow::Wait)
    }

    fn step_committing(&mut self, mut commit: Commit) -> Result<Flow, Error> {
        if !commit.finished {
            let mut descriptor = self.pool.acquire();

            if let Err(error) = self.fill_body(&mut commit, &mut descriptor) {
                // The head is already out, all that's left is to cut the connection
                self.pool.release(descriptor);
                event!(Level::ERROR, ?error, "failed to write response body");
                return Ok(Flow::Close);
            }

            self.begin_write(descriptor)?;
            self.state = State::Committing(commit);
            return Ok(Flow::Wait);
        }

        match commit.after {
            After::NextRequest => {
                event!(Level::TRACE, "awaiting next request");
                self.framer.begin_message();
                self.state = State::AwaitingRequest(HeadParser::new());
                Ok(Flow::Continue)
            }
            After::Close => Ok(Flow::Close),
            After::Upgrade(request) => Ok(Flow::HandOff(request)),
        }
    }

    /// Serialize body data into the descriptor, up to the buffer size.
    fn fill_body(&self, commit: &mut Commit, descriptor: &mut Descriptor) -> Result<(), HttpError> {
        if commit.head_only {
            commit.finished = true;
            return Ok(());
        }

        let limit = self.config.buffer_size;
        let out = descriptor.buffer_mut();

        while out.len() < limit {
            let max = limit - out.len();
            if !commit.body.next_block(max, &mut commit.block)? {
                commit.writer.close(out)?;
                if commit.writer.is_chunked() {
                    write_chunked_terminator(out);
                }

                commit.finished = true;
                break;
            }

            commit.writer.write(&commit.block, out)?;
        }

        Ok(())
    }

    /// Answer a failure that happened before a response was committed.
    fn fail(&mut self, error: HttpError) -> Result<Flow, Error> {
        if let HttpError::ConnectionLost = error {
            event!(Level::DEBUG, "peer closed connection");
            return Ok(Flow::Close);
        }

        if error.is_framing() {
            event!(Level::WARN, %error, "bad request");
        } else {
            event!(Level::ERROR, ?error, "failed to read request");
        }

        let status = error.status();
        let response = Response::error(status, reason_phrase(status));
        self.begin_commit(response, Exchange::default(), After::Close)
    }

    fn begin_read(&mut self) -> Result<(), Error> {
        let max_len = self.framer.spare_capacity();
        event!(Level::TRACE, max_len, "reading");

        self.tcp_actions
            .send(tcp::StreamAction::Read { max_len })
            .context("failed to start read")?;
        self.io_pending = true;

        Ok(())
    }

    fn begin_write(&mut self, descriptor: Descriptor) -> Result<(), Error> {
        event!(Level::TRACE, len = descriptor.len(), "writing");

        self.tcp_actions
            .send(tcp::StreamAction::Write(descriptor))
            .context("failed to start write")?;
        self.io_pending = true;

        Ok(())
    }

    fn on_completed(&mut self, completion: Completion) {
        self.io_pending = false;

        match (completion.kind, &completion.result) {
            (OperationKind::Read, Ok(0)) => {
                event!(Level::TRACE, "end of stream");
                self.framer.mark_eof();
            }
            (OperationKind::Read, Ok(count)) => {
                event!(Level::TRACE, count, "received data");
                self.framer.fill(completion.data());
            }
            (OperationKind::Read, Err(error)) => {
                // Parsing reports the loss, depending on where in a message it happened
                event!(Level::DEBUG, %error, "read failed");
                self.framer.mark_eof();
            }
            (OperationKind::Write, Ok(count)) => {
                event!(Level::TRACE, count, "sent data");
            }
            (OperationKind::Write, Err(error)) => {
                event!(Level::DEBUG, %error, "write failed");
                self.io_failed = true;
            }
        }

        self.pool.release(completion.descriptor);
    }

    fn close(&mut self, meta: &mut Metadata) -> Result<(), Error> {
        self.state = State::Closed;
        meta.set_stop();

        if !self.tcp_closing {
            self.tcp_closing = true;
            self.tcp_actions
                .send(tcp::StreamAction::Close)
                .context("failed to close stream")?;
        }

        Ok(())
    }

    fn hand_off(&mut self, request: Request, meta: &mut Metadata) -> Result<(), Error> {
        event!(Level::DEBUG, "handing off upgraded connection");

        // Whoever receives the stream binds their own signal
        let events = std::mem::take(&mut self.tcp_events);
        events.set_floating();

        let event = UpgradedEvent {
            request,
            events,
            actions: self.tcp_actions.clone(),
            pool: self.pool.clone(),
            leftover: self.framer.take_remaining(),
        };

        self.handed_off = true;
        self.state = State::Closed;
        meta.set_stop();

        self.http_events
            .send(HttpEvent::Upgraded(event))
            .context("failed to hand off upgraded connection")?;

        Ok(())
    }
}

fn too_large_state(exchange: Exchange, reader: BodyReader, error: HttpError) -> State {
    State::Draining {
        exchange,
        reader,
        response: Response::error(error.status(), error.to_string()),
    }
}
