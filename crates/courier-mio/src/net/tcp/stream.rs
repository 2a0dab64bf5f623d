use std::task::Poll;

use anyhow::{Context as _, Error};
use courier::{
    message::{Mailbox, Sender},
    Actor, Metadata, World,
};
use mio::Interest;
use tracing::{event, Level};

use crate::{
    Completion, CompletionPool, Descriptor, Operation, OperationError, ReadyRef, RegistryRef,
};

pub enum StreamAction {
    /// Begin receiving up to `max_len` bytes, zero meaning the pool's buffer size.
    Read { max_len: usize },
    /// Begin sending all data in the descriptor.
    Write(Descriptor),
    /// Fail any pending operation, close and stop the stream.
    Close,
}

pub enum StreamEvent {
    /// An operation finished, the receiver now owns the descriptor.
    Completed(Completion),
    /// The stream has been closed and stopped.
    Closed,
}

/// Start a stream actor for an already connected socket.
///
/// Operations are started by sending `StreamAction`s, every started operation is answered by
/// exactly one `StreamEvent::Completed` on `events`.
pub fn open(
    world: &mut World,
    registry: RegistryRef,
    stream: mio::net::TcpStream,
    pool: CompletionPool,
    events: Sender<StreamEvent>,
) -> Result<Sender<StreamAction>, Error> {
    let actor = Service {
        registry,
        actions: Mailbox::default(),
        events,
        pool,

        stream,
        ready: None,
        pending: None,
    };
    let actions = actor.actions.sender();

    world
        .insert("tcp-stream", actor)
        .context("failed to insert stream actor")?;

    Ok(actions)
}

struct Service {
    registry: RegistryRef,
    actions: Mailbox<StreamAction>,
    events: Sender<StreamEvent>,
    pool: CompletionPool,

    stream: mio::net::TcpStream,
    ready: Option<ReadyRef>,
    pending: Option<Operation>,
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Some(ready) = &self.ready {
            ready.deregister(&mut self.stream);
        }
    }
}

impl Actor for Service {
    fn register(&mut self, world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        let signal = world.signal(meta.id());
        self.actions.set_signal(signal.clone())?;

        let interest = Interest::READABLE | Interest::WRITABLE;
        let ready = self
            .registry
            .register(&mut self.stream, interest, signal)?;
        self.ready = Some(ready);

        Ok(())
    }

    fn process(&mut self, _world: &mut World, meta: &mut Metadata) -> Result<(), Error> {
        // Readiness only tells us it's worth trying again, mio readiness is edge-triggered so
        // every wake-up has to make as much progress as possible
        if let Some(ready) = &self.ready {
            ready.take();
        }

        while let Some(action) = self.actions.recv() {
            match action {
                StreamAction::Read { max_len } => {
                    let max_len = if max_len == 0 {
                        self.pool.buffer_size()
                    } else {
                        max_len
                    };
                    let descriptor = self.pool.acquire();
                    self.begin(Operation::read(descriptor, max_len))?;
                }
                StreamAction::Write(descriptor) => {
                    self.begin(Operation::write(descriptor))?;
                }
                StreamAction::Close => {
                    self.close()?;
                    meta.set_stop();
                    return Ok(());
                }
            }
        }

        self.advance()?;

        // Nobody can start operations or receive their results anymore
        let abandoned = self.actions.is_orphaned() && self.pending.is_none();
        if abandoned || self.events.is_closed() {
            event!(Level::DEBUG, "stream owner gone, stopping");
            meta.set_stop();
        }

        Ok(())
    }
}

impl Service {
    fn begin(&mut self, mut operation: Operation) -> Result<(), Error> {
        if self.pending.is_some() {
            event!(Level::WARN, kind = ?operation.kind(), "operation started while busy");
            let completion = operation.complete(Err(OperationError::Busy))?;
            return self.send_completed(completion);
        }

        self.pending = Some(operation);
        self.advance()
    }

    fn advance(&mut self) -> Result<(), Error> {
        let Some(operation) = self.pending.as_mut() else {
            return Ok(());
        };

        let Poll::Ready(result) = operation.advance(&mut self.stream) else {
            return Ok(());
        };

        if let Ok(count) = &result {
            event!(Level::TRACE, kind = ?operation.kind(), count, "operation completed");
        }

        let completion = operation.complete(result)?;
        self.pending = None;
        self.send_completed(completion)
    }

    fn close(&mut self) -> Result<(), Error> {
        event!(Level::DEBUG, "closing stream");

        if let Err(error) = self.stream.shutdown(std::net::Shutdown::Both) {
            event!(Level::TRACE, ?error, "shutdown on already closed stream");
        }

        // An owner closing on its way out isn't around to be told
        if self.events.is_closed() {
            return Ok(());
        }

        if let Some(mut operation) = self.pending.take() {
            let completion = operation.complete(Err(OperationError::ConnectionLost))?;
            self.send_completed(completion)?;
        }

        self.events
            .send(StreamEvent::Closed)
            .context("failed to send closed event")?;

        Ok(())
    }

    fn send_completed(&mut self, completion: Completion) -> Result<(), Error> {
        self.events
            .send(StreamEvent::Completed(completion))
            .context("failed to send completion")?;

        Ok(())
    }
}
