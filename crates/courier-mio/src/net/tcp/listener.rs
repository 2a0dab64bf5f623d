use std::{io::ErrorKind, net::SocketAddr};

use anyhow::{Context as _, Error};
use courier::{
    message::{Mailbox, Sender},
    Actor, Metadata, World,
};
use mio::Interest;
use tracing::{event, instrument, Level};

use crate::{
    net::{check_io, tcp},
    CompletionPool, ReadyRef, RegistryRef,
};

pub enum ListenerAction {
    /// Close the listener.
    Close,
}

pub struct ListenerInfo {
    pub local_addr: SocketAddr,
}

pub enum ListenerEvent {
    Connected(ConnectedEvent),
    Closed,
}

pub struct ConnectedEvent {
    /// Events of the new stream, floating until the receiver binds its signal.
    pub events: Mailbox<tcp::StreamEvent>,
    pub actions: Sender<tcp::StreamAction>,
    pub pool: CompletionPool,
    pub remote_addr: SocketAddr,
}

/// Start accepting TCP connections on an already bound listener.
///
/// Taking a bound `std` listener lets several worker threads accept from clones of the same
/// socket, each with their own world and registry.
#[instrument("tcp::listen", skip_all)]
pub fn listen(
    world: &mut World,
    registry: RegistryRef,
    listener: std::net::TcpListener,
    pool: CompletionPool,
    events: Sender<ListenerEvent>,
) -> Result<(Sender<ListenerAction>, ListenerInfo), Error> {
    listener
        .set_nonblocking(true)
        .context("failed to set listener non-blocking")?;
    let listener = mio::net::TcpListener::from_std(listener);
    let local_addr = listener.local_addr()?;
    event!(Level::DEBUG, ?local_addr, "listening");

    let actor = Service {
        registry,
        actions: Mailbox::default(),
        events,
        pool,

        listener,
        ready: None,
    };
    let actions = actor.actions.sender();

    world
        .insert("tcp-listener", actor)
        .context("failed to insert listener actor")?;

    let info = ListenerInfo { local_addr };
    Ok((actions, info))
}

struct Service {
    registry: RegistryRef,
    actions: Mailbox<ListenerAction>,
    events: Sender<ListenerEvent>,
    pool: CompletionPool,

    listener: mio::net::TcpListener,
    ready: Option<ReadyRef>,
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Some(ready) = &self.ready {
            ready.deregister(&mut self.listener);
        }
    }
}

impl Actor for Service {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        let signal = world.signal(meta.id());
        self.actions.set_signal(signal.clone())?;

        let ready = self
            .registry
            .register(&mut self.listener, Interest::READABLE, signal)?;
        self.ready = Some(ready);

        Ok(())
    }

    fn process(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        if let Some(action) = self.actions.recv() {
            match action {
                ListenerAction::Close => {
                    event!(Level::DEBUG, "closing listener");
                    if !self.events.is_closed() {
                        self.events.send(ListenerEvent::Closed)?;
                    }
                    meta.set_stop();
                    return Ok(());
                }
            }
        }

        let readable = self.ready.as_ref().map_or(false, |ready| ready.take().readable);
        if readable {
            self.on_listener_ready(world)?;
        }

        if self.events.is_closed() {
            event!(Level::DEBUG, "listener owner gone, stopping");
            meta.set_stop();
        }

        Ok(())
    }
}

impl Service {
    fn on_listener_ready(&mut self, world: &mut World) -> Result<(), Error> {
        loop {
            // A failed accept only affects that one connection
            let (stream, remote_addr) = match check_io(self.listener.accept()) {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(error) => match error.kind() {
                    // Aborted handshakes are gone by the time we get to them
                    ErrorKind::ConnectionAborted | ErrorKind::Interrupted => continue,
                    _ => {
                        event!(Level::WARN, ?error, "failed to accept stream");
                        break;
                    }
                },
            };
            event!(Level::DEBUG, ?remote_addr, "stream accepted");

            if let Err(error) = stream.set_nodelay(true) {
                event!(Level::DEBUG, ?error, "failed to set nodelay");
            }

            let events = Mailbox::floating();
            let actions = tcp::open(
                world,
                self.registry.clone(),
                stream,
                self.pool.clone(),
                events.sender(),
            )?;

            let event = ConnectedEvent {
                events,
                actions,
                pool: self.pool.clone(),
                remote_addr,
            };
            self.events.send(ListenerEvent::Connected(event))?;
        }

        Ok(())
    }
}
