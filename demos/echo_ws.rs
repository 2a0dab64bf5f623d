use std::net::TcpListener;

use anyhow::{Context as _, Error};
use courier::{
    message::{Mailbox, Sender},
    Actor, Metadata, World,
};
use courier_http::{HttpConfig, HttpEvent, RequestAction, Response, UpgradedEvent};
use courier_mio::{
    net::tcp::{StreamAction, StreamEvent},
    CompletionPool, OperationKind, Registry,
};
use tracing::{event, Level};

/// Serves a page that opens a WebSocket, and echoes every message sent over it.
fn main() -> Result<(), Error> {
    devutils::init_logging();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1234".to_string());
    let listener = TcpListener::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;

    let mut world = World::default();
    let registry = Registry::new()?;

    let actor = Service {
        http_events: Mailbox::default(),
    };
    let http_events = actor.http_events.sender();
    world.insert("echo-ws", actor)?;

    let config = HttpConfig::default();
    let pool = CompletionPool::new(config.buffer_size);
    let (_actions, info) = courier_http::listen(
        &mut world,
        registry.clone(),
        listener,
        pool,
        config,
        http_events,
    )?;
    event!(Level::INFO, "open http://{}/", info.local_addr);

    courier_mio::run_event_loop(&mut world, &registry)?;

    Ok(())
}

struct Service {
    http_events: Mailbox<HttpEvent>,
}

impl Actor for Service {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        self.http_events.set_signal(world.signal(meta.id()))?;
        Ok(())
    }

    fn process(&mut self, world: &mut World, _meta: &mut Metadata) -> Result<(), Error> {
        while let Some(event) = self.http_events.recv() {
            match event {
                HttpEvent::Request(event) => {
                    let response = Response::html(200, PAGE);
                    event.actions.send(RequestAction::Respond(response))?;
                }
                HttpEvent::Upgraded(event) => {
                    event!(Level::INFO, path = event.request.path(), "websocket opened");
                    world.insert("echo-ws-session", Session::new(event))?;
                }
            }
        }

        Ok(())
    }
}

/// Echoes WebSocket messages on one upgraded connection.
struct Session {
    events: Mailbox<StreamEvent>,
    actions: Sender<StreamAction>,
    pool: CompletionPool,

    received: Vec<u8>,
    outgoing: Vec<u8>,
    pending: bool,
    closing: bool,
}

impl Session {
    fn new(event: UpgradedEvent) -> Self {
        Self {
            events: event.events,
            actions: event.actions,
            pool: event.pool,

            received: event.leftover.to_vec(),
            outgoing: Vec::new(),
            pending: false,
            closing: false,
        }
    }

    fn on_frames(&mut self) {
        while let Some((opcode, payload, consumed)) = decode_frame(&self.received) {
            self.received.drain(..consumed);

            match opcode {
                OP_TEXT | OP_BINARY => {
                    event!(Level::DEBUG, len = payload.len(), "echoing message");
                    encode_frame(opcode, &payload, &mut self.outgoing);
                }
                OP_PING => encode_frame(OP_PONG, &payload, &mut self.outgoing),
                OP_CLOSE => {
                    encode_frame(OP_CLOSE, &payload, &mut self.outgoing);
                    self.closing = true;
                    return;
                }
                _ => {}
            }
        }
    }
}

impl Actor for Session {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        let signal = world.signal(meta.id());
        self.events.set_signal(signal.clone())?;

        // Frames may have arrived together with the handshake
        signal.send()?;

        Ok(())
    }

    fn process(&mut self, _world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        while let Some(event) = self.events.recv() {
            let completion = match event {
                StreamEvent::Completed(completion) => completion,
                StreamEvent::Closed => {
                    event!(Level::INFO, "websocket closed");
                    meta.set_stop();
                    return Ok(());
                }
            };
            self.pending = false;

            match (completion.kind, &completion.result) {
                (OperationKind::Read, Ok(count)) if *count > 0 => {
                    self.received.extend_from_slice(completion.data());
                }
                (OperationKind::Write, Ok(_)) => {}
                _ => self.closing = true,
            }
            self.pool.release(completion.descriptor);
        }

        self.on_frames();

        if self.pending {
            return Ok(());
        }

        if !self.outgoing.is_empty() {
            let mut descriptor = self.pool.acquire();
            descriptor.buffer_mut().append(&mut self.outgoing);
            self.actions.send(StreamAction::Write(descriptor))?;
            self.pending = true;
        } else if self.closing {
            self.actions.send(StreamAction::Close)?;
        } else {
            self.actions.send(StreamAction::Read { max_len: 0 })?;
            self.pending = true;
        }

        Ok(())
    }
}

const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// Decode one complete client frame, returning its opcode, unmasked payload, and size.
fn decode_frame(data: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
    let opcode = data.first()? & 0x0F;
    let second = *data.get(1)?;
    let masked = second & 0x80 != 0;

    let (len, mut offset) = match second & 0x7F {
        126 => (u16::from_be_bytes([*data.get(2)?, *data.get(3)?]) as usize, 4),
        127 => {
            let bytes = data.get(2..10)?.try_into().ok()?;
            (u64::from_be_bytes(bytes) as usize, 10)
        }
        len => (len as usize, 2),
    };

    let mut mask = [0; 4];
    if masked {
        mask.copy_from_slice(data.get(offset..offset + 4)?);
        offset += 4;
    }

    let payload = data.get(offset..offset + len)?;
    let payload = payload
        .iter()
        .enumerate()
        .map(|(i, byte)| if masked { byte ^ mask[i % 4] } else { *byte })
        .collect();

    Some((opcode, payload, offset + len))
}

/// Encode a final, unmasked server frame.
fn encode_frame(opcode: u8, payload: &[u8], out: &mut Vec<u8>) {
    out.push(0x80 | opcode);

    match payload.len() {
        len if len < 126 => out.push(len as u8),
        len if len <= u16::MAX as usize => {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    out.extend_from_slice(payload);
}

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<body>
<input id="message" value="Hello, World!"><button id="send">Send</button>
<pre id="log"></pre>
<script>
const socket = new WebSocket(`ws://${location.host}/ws`);
const log = (line) => document.getElementById("log").textContent += line + "\n";
socket.onopen = () => log("connected");
socket.onmessage = (event) => log("echo: " + event.data);
socket.onclose = () => log("closed");
document.getElementById("send").onclick =
    () => socket.send(document.getElementById("message").value);
</script>
</body>
</html>
"#;
