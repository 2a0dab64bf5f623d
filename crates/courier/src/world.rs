use anyhow::{Context as _, Error};
use thiserror::Error;
use thunderdome::{Arena, Index};
use tracing::{event, instrument, span, Level};

use crate::{
    message::{Signal, SignalRegistry},
    Actor, Metadata,
};

/// Thread-local actor collection and scheduler.
#[derive(Default)]
pub struct World {
    nodes: Arena<Node>,
    signals: SignalRegistry,
}

struct Node {
    name: &'static str,
    actor: Option<Box<dyn Actor>>,
}

impl World {
    /// Insert an actor into the world.
    ///
    /// The given `name` will be used in logging.
    #[instrument("World::insert", level = "debug", skip_all)]
    pub fn insert<A>(&mut self, name: &'static str, mut actor: A) -> Result<Id, InsertError>
    where
        A: Actor,
    {
        event!(Level::DEBUG, name, "inserting actor");

        let node = Node { name, actor: None };
        let index = self.nodes.insert(node);
        self.signals.insert(index);
        let id = Id { index };

        // Let the actor bind its signal before anything can be sent to it
        let mut meta = Metadata::new(id);
        if let Err(error) = actor.register(self, &mut meta) {
            self.remove(index);
            return Err(InsertError::Register(error));
        }

        let node = self.nodes.get_mut(index).ok_or(InsertError::Removed)?;
        node.actor = Some(Box::new(actor));

        Ok(id)
    }

    /// Get a `Signal` that schedules the actor for processing.
    pub fn signal(&self, id: Id) -> Signal {
        self.signals.signal(id.index)
    }

    /// Number of actors currently in the world.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no actors are left in the world.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Process all signalled actors, until none are left pending.
    #[instrument("World::run_until_idle", level = "trace", skip_all)]
    pub fn run_until_idle(&mut self) -> Result<(), ProcessError> {
        while let Some(index) = self.signals.next()? {
            self.process(index).context("failed to process actor")?;
        }

        Ok(())
    }

    fn process(&mut self, index: Index) -> Result<(), Error> {
        // Borrow the actor
        let node = self.nodes.get_mut(index).context("failed to find actor")?;
        let name = node.name;
        let mut actor = node.actor.take().context("actor unavailable")?;

        let span = span!(Level::INFO, "actor", name);
        let _entered = span.enter();
        event!(Level::TRACE, "processing actor");

        // Run the process handler
        let mut meta = Metadata::new(Id { index });
        let stop = match actor.process(self, &mut meta) {
            Ok(()) => meta.is_stop_requested(),
            Err(error) => {
                // It's better to stop than to potentially retain inconsistent state
                event!(Level::ERROR, "error while processing, stopping actor:\n{:?}", error);
                true
            }
        };

        if stop {
            self.remove(index);

            // Dropping may send messages and signals to other actors, so this happens only after
            // the node is gone
            drop(actor);
            return Ok(());
        }

        // Return the actor
        let node = self
            .nodes
            .get_mut(index)
            .context("failed to find actor for return")?;
        node.actor = Some(actor);

        Ok(())
    }

    fn remove(&mut self, index: Index) {
        event!(Level::DEBUG, "removing actor");

        self.nodes.remove(index);
        if let Err(error) = self.signals.remove(index) {
            event!(Level::WARN, ?error, "failed to remove actor signal state");
        }
    }

    fn query_debug_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|(_, node)| node.name).collect()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        let debug_names = self.query_debug_names();

        if !debug_names.is_empty() {
            event!(
                Level::WARN,
                ?debug_names,
                "actors not cleaned up before world drop",
            );
        }
    }
}

/// Identifier of an actor inserted into a world.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Id {
    index: Index,
}

/// Failed to insert an actor.
#[derive(Error, Debug)]
pub enum InsertError {
    /// The actor's `register` failed, the actor has not been inserted.
    #[error("actor failed to register")]
    Register(#[source] Error),
    /// The actor's node was removed during registration.
    #[error("actor removed while registering")]
    Removed,
}

/// Failed to process actors.
#[derive(Error, Debug)]
#[error("failed to process actors")]
pub struct ProcessError {
    #[from]
    source: Error,
}
