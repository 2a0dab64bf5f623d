use std::rc::Rc;

use anyhow::{Context as _, Error};
use courier::{
    message::{Mailbox, Sender},
    Actor, Metadata, World,
};
use courier_mio::{net::tcp, CompletionPool, RegistryRef};
use tracing::{event, instrument, Level};

use crate::{connection, HttpConfig, HttpEvent};

pub enum ServerAction {
    /// Stop accepting, and close all open connections.
    Close,
}

/// Start serving HTTP on an already bound listener.
///
/// Every accepted connection gets its own connection actor, requests from all of them are sent
/// to `http_events`. Workers on other threads can share the same `pool`.
#[instrument("http::listen", skip_all)]
pub fn listen(
    world: &mut World,
    registry: RegistryRef,
    listener: std::net::TcpListener,
    pool: CompletionPool,
    config: HttpConfig,
    http_events: Sender<HttpEvent>,
) -> Result<(Sender<ServerAction>, tcp::ListenerInfo), Error> {
    let tcp_events = Mailbox::default();
    let (tcp_actions, info) = tcp::listen(world, registry, listener, pool, tcp_events.sender())
        .context("failed to start tcp listener")?;
    event!(Level::INFO, addr = ?info.local_addr, "serving http");

    let actor = Service {
        config: Rc::new(config),
        actions: Mailbox::default(),
        tcp_events,
        tcp_actions,
        http_events,

        connections: Vec::new(),
    };
    let actions = actor.actions.sender();
    world.insert("http-server", actor)?;

    Ok((actions, info))
}

struct Service {
    config: Rc<HttpConfig>,
    actions: Mailbox<ServerAction>,
    tcp_events: Mailbox<tcp::ListenerEvent>,
    tcp_actions: Sender<tcp::ListenerAction>,
    http_events: Sender<HttpEvent>,

    connections: Vec<ConnectionEntry>,
}

struct ConnectionEntry {
    events: Mailbox<connection::ConnectionEvent>,
    actions: Sender<connection::ConnectionAction>,
    closed: bool,
}

impl Drop for Service {
    fn drop(&mut self) {
        event!(Level::DEBUG, "closing");

        let _ = self.tcp_actions.send(tcp::ListenerAction::Close);

        // Close all not yet closed connections
        for connection in &self.connections {
            if connection.closed {
                continue;
            }

            let _ = connection
                .actions
                .send(connection::ConnectionAction::Close);
        }
    }
}

impl Actor for Service {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        let signal = world.signal(meta.id());
        self.actions.set_signal(signal.clone())?;
        self.tcp_events.set_signal(signal)?;

        Ok(())
    }

    fn process(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        if let Some(action) = self.actions.recv() {
            match action {
                ServerAction::Close => {
                    meta.set_stop();
                    return Ok(());
                }
            }
        }

        // Handle incoming TCP connections
        while let Some(event) = self.tcp_events.recv() {
            match event {
                tcp::ListenerEvent::Connected(connected) => {
                    let events = Mailbox::default();
                    events.set_signal(world.signal(meta.id()))?;

                    let actions = connection::open(
                        world,
                        connected,
                        self.config.clone(),
                        self.http_events.clone(),
                        events.sender(),
                    )?;

                    // Track the connection
                    let entry = ConnectionEntry {
                        events,
                        actions,
                        closed: false,
                    };
                    self.connections.push(entry);
                }
                tcp::ListenerEvent::Closed => meta.set_stop(),
            }
        }

        // Process open connections
        for connection in &mut self.connections {
            while let Some(event) = connection.events.recv() {
                match event {
                    connection::ConnectionEvent::Closed => {
                        connection.closed = true;
                    }
                }
            }
        }
        self.connections.retain(|c| !c.closed);

        Ok(())
    }
}
