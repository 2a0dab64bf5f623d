//! Messaging utilities.

mod mailbox;
mod signal;

pub(crate) use self::signal::SignalRegistry;
pub use self::{
    mailbox::{Mailbox, SendError, Sender},
    signal::{Signal, SignalError},
};
