#![deny(missing_docs)]

//! A minimal single-threaded actor runtime.
//!
//! Every connection served by courier is an actor in a `World`. Actors are never blocked on,
//! instead they are woken through a `Signal` whenever one of their mailboxes or sockets has
//! something for them, and then perform one processing step.

mod actor;
pub mod message;
mod world;

pub use self::{
    actor::{Actor, Metadata},
    world::{Id, InsertError, ProcessError, World},
};
