//! Mio event loop runner for courier.
//!
//! Turns readiness-based mio sockets into completion-style operations: an owner asks a stream
//! actor to read or write using a pooled `Descriptor`, and gets exactly one `Completion` back.

pub mod completion;
mod event_loop;
pub mod net;
mod registry;

pub use self::{
    completion::{
        Completion, CompletionError, CompletionPool, Descriptor, Operation, OperationError,
        OperationKind,
    },
    event_loop::run_event_loop,
    registry::{ReadyRef, ReadyState, Registry, RegistryRef},
};
