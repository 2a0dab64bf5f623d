//! Pooled completion-style socket operations.
//!
//! A `Descriptor` is owned by exactly one party at a time: the pool, the caller preparing an
//! operation, or the `Operation` in flight. Ownership moving through these values is what
//! prevents a descriptor from being reused while an operation still refers to it.

mod operation;
mod pool;

pub use self::{
    operation::{Completion, CompletionError, Operation, OperationError},
    pool::{CompletionPool, Descriptor},
};

/// Direction of a socket operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}
