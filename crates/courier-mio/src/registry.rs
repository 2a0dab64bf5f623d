use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use anyhow::{Context as _, Error};
use courier::message::Signal;
use mio::{event::Source, Events, Interest, Poll, Token};
use tracing::{event, Level};

pub type RegistryRef = Rc<Registry>;

/// Shared mio context registry.
///
/// Actors use the registry to get woken up when their sources become ready.
pub struct Registry {
    poll: RefCell<Poll>,
    next_token: Cell<usize>,
    entries: RefCell<HashMap<Token, ReadyEntry>>,
}

struct ReadyEntry {
    signal: Signal,
    state: Rc<Cell<ReadyState>>,
}

impl Registry {
    pub fn new() -> Result<RegistryRef, Error> {
        let poll = Poll::new().context("failed to create mio poll")?;

        let value = Self {
            poll: RefCell::new(poll),
            next_token: Cell::new(0),
            entries: RefCell::new(HashMap::new()),
        };
        Ok(Rc::new(value))
    }

    /// Register a source, sending `signal` whenever it becomes ready.
    pub fn register<S>(
        self: &Rc<Self>,
        source: &mut S,
        interest: Interest,
        signal: Signal,
    ) -> Result<ReadyRef, Error>
    where
        S: Source,
    {
        let token = Token(self.next_token.get());
        self.next_token.set(token.0 + 1);

        let state = Rc::new(Cell::new(ReadyState::default()));
        let entry = ReadyEntry {
            signal,
            state: state.clone(),
        };
        self.entries.borrow_mut().insert(token, entry);

        self.poll
            .borrow()
            .registry()
            .register(source, token, interest)
            .context("failed to register source")?;

        let ready = ReadyRef {
            registry: self.clone(),
            token,
            state,
        };
        Ok(ready)
    }

    pub(crate) fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> Result<(), Error> {
        let result = self.poll.borrow_mut().poll(events, timeout);

        match result {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                events.clear();
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    pub(crate) fn wake(&self, token: Token, readable: bool, writable: bool) {
        let entries = self.entries.borrow();

        // Sources may have been deregistered with events still in flight
        let Some(entry) = entries.get(&token) else {
            event!(Level::TRACE, ?token, "ready event for unknown token");
            return;
        };

        let mut state = entry.state.get();
        state.readable |= readable;
        state.writable |= writable;
        entry.state.set(state);

        if let Err(error) = entry.signal.send() {
            event!(Level::DEBUG, ?error, "failed to signal ready source owner");
        }
    }

    fn deregister<S>(&self, token: Token, source: &mut S) -> Result<(), Error>
    where
        S: Source,
    {
        self.entries.borrow_mut().remove(&token);
        self.poll
            .borrow()
            .registry()
            .deregister(source)
            .context("failed to deregister source")?;

        Ok(())
    }
}

/// Readiness accumulated for a registered source since it was last taken.
#[derive(Default, Debug, Clone, Copy)]
pub struct ReadyState {
    pub readable: bool,
    pub writable: bool,
}

/// Handle to a source registration.
pub struct ReadyRef {
    registry: RegistryRef,
    token: Token,
    state: Rc<Cell<ReadyState>>,
}

impl ReadyRef {
    /// Take the accumulated readiness, resetting it.
    pub fn take(&self) -> ReadyState {
        self.state.take()
    }

    pub fn deregister<S>(&self, source: &mut S)
    where
        S: Source,
    {
        if let Err(error) = self.registry.deregister(self.token, source) {
            event!(Level::WARN, ?error, "failed to deregister source");
        }
    }
}
