use std::{
    io::{Read, Write},
    net::{Shutdown, TcpListener, TcpStream},
    thread,
    time::Duration,
};

use anyhow::Error;
use courier::{
    message::{Mailbox, Sender},
    Actor, Metadata, World,
};
use courier_mio::{
    net::tcp::{self, ListenerAction, ListenerEvent, StreamAction, StreamEvent},
    run_event_loop, CompletionPool, OperationError, OperationKind, Registry,
};
use tracing_test::traced_test;

/// Echoes everything on a single connection, then closes the listener.
struct EchoActor {
    listener_events: Mailbox<ListenerEvent>,
    listener_actions: Sender<ListenerAction>,
    connection: Option<(Mailbox<StreamEvent>, Sender<StreamAction>)>,
    pool: CompletionPool,
}

impl Actor for EchoActor {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        self.listener_events.set_signal(world.signal(meta.id()))?;
        Ok(())
    }

    fn process(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        while let Some(event) = self.listener_events.recv() {
            match event {
                ListenerEvent::Connected(event) => {
                    event.events.set_signal(world.signal(meta.id()))?;
                    event.actions.send(StreamAction::Read { max_len: 0 })?;

                    // A second read while the first is pending must be refused
                    event.actions.send(StreamAction::Read { max_len: 0 })?;

                    self.connection = Some((event.events, event.actions));
                }
                ListenerEvent::Closed => meta.set_stop(),
            }
        }

        let Some((events, actions)) = &self.connection else {
            return Ok(());
        };

        while let Some(event) = events.recv() {
            let completion = match event {
                StreamEvent::Completed(completion) => completion,
                StreamEvent::Closed => {
                    self.listener_actions.send(ListenerAction::Close)?;
                    continue;
                }
            };

            match (completion.kind, &completion.result) {
                (_, Err(OperationError::Busy)) => {
                    self.pool.release(completion.descriptor);
                }
                (OperationKind::Read, Ok(count)) if *count > 0 => {
                    actions.send(StreamAction::Write(completion.descriptor))?;
                }
                (OperationKind::Write, Ok(_)) => {
                    self.pool.release(completion.descriptor);
                    actions.send(StreamAction::Read { max_len: 0 })?;
                }
                _ => {
                    self.pool.release(completion.descriptor);
                    actions.send(StreamAction::Close)?;
                }
            }
        }

        Ok(())
    }
}

#[test]
#[traced_test]
fn echo_until_peer_closes() -> Result<(), Error> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let client = thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;

        // Give the server time to start its first read, so the second one finds it pending
        thread::sleep(Duration::from_millis(100));

        stream.write_all(b"hello")?;
        let mut reply = [0; 5];
        stream.read_exact(&mut reply)?;

        stream.shutdown(Shutdown::Write)?;
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest)?;

        let mut all = reply.to_vec();
        all.extend_from_slice(&rest);
        Ok(all)
    });

    let mut world = World::default();
    let registry = Registry::new()?;
    let pool = CompletionPool::new(1024);

    let listener_events = Mailbox::floating();
    let (listener_actions, info) = tcp::listen(
        &mut world,
        registry.clone(),
        listener,
        pool.clone(),
        listener_events.sender(),
    )?;
    assert_eq!(info.local_addr, addr);

    let actor = EchoActor {
        listener_events,
        listener_actions,
        connection: None,
        pool: pool.clone(),
    };
    world.insert("echo", actor)?;

    run_event_loop(&mut world, &registry)?;

    let echoed = client.join().expect("client panicked")?;
    assert_eq!(echoed, b"hello");
    assert!(world.is_empty());
    assert!(logs_contain("operation started while busy"));

    // Every descriptor came back to the pool
    assert_eq!(pool.idle(), pool.created());

    Ok(())
}
