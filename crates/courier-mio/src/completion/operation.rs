use std::{
    io::{ErrorKind, Read, Write},
    task::Poll,
};

use thiserror::Error;
use tracing::{event, Level};

use crate::{Descriptor, OperationKind};

/// One pending read or write against a socket.
///
/// Bridges readiness to completion: `advance` is retried whenever the socket becomes ready, and
/// once it resolves `complete` hands the descriptor back inside a `Completion`, exactly once.
pub struct Operation {
    kind: OperationKind,
    descriptor: Option<Descriptor>,
    requested: usize,
    transferred: usize,
}

impl Operation {
    /// Start a read of up to `max_len` bytes into `descriptor`.
    pub fn read(mut descriptor: Descriptor, max_len: usize) -> Self {
        descriptor.bind(OperationKind::Read);
        descriptor.buffer().clear();

        Self {
            kind: OperationKind::Read,
            descriptor: Some(descriptor),
            requested: max_len,
            transferred: 0,
        }
    }

    /// Start writing all data currently held by `descriptor`.
    pub fn write(mut descriptor: Descriptor) -> Self {
        descriptor.bind(OperationKind::Write);
        let requested = descriptor.len();

        Self {
            kind: OperationKind::Write,
            descriptor: Some(descriptor),
            requested,
            transferred: 0,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    pub fn is_completed(&self) -> bool {
        self.descriptor.is_none()
    }

    /// Make as much progress as possible without blocking.
    ///
    /// Reads resolve as soon as any data (or end of stream) arrives. Writes resolve only once
    /// every byte has been accepted by the socket.
    pub fn advance<S>(&mut self, io: &mut S) -> Poll<Result<usize, OperationError>>
    where
        S: Read + Write,
    {
        let Some(descriptor) = self.descriptor.as_mut() else {
            return Poll::Ready(Err(OperationError::ConnectionLost));
        };

        let result = match self.kind {
            OperationKind::Read => advance_read(descriptor, self.requested, io),
            OperationKind::Write => advance_write(descriptor, &mut self.transferred, io),
        };

        if let Poll::Ready(Ok(count)) = &result {
            self.transferred = *count;
        }
        result
    }

    /// Resolve the operation, handing the descriptor back to the owner.
    pub fn complete(
        &mut self,
        result: Result<usize, OperationError>,
    ) -> Result<Completion, CompletionError> {
        let descriptor = self
            .descriptor
            .take()
            .ok_or(CompletionError::AlreadyCompleted)?;

        if let Err(error) = &result {
            event!(Level::DEBUG, kind = ?self.kind, %error, "operation failed");
        }

        let completion = Completion {
            kind: self.kind,
            descriptor,
            result,
        };
        Ok(completion)
    }
}

fn advance_read<S>(
    descriptor: &mut Descriptor,
    requested: usize,
    io: &mut S,
) -> Poll<Result<usize, OperationError>>
where
    S: Read,
{
    let buffer = descriptor.buffer();
    buffer.resize(requested, 0);

    loop {
        match io.read(&mut buffer[..]) {
            Ok(count) => {
                buffer.truncate(count);
                return Poll::Ready(Ok(count));
            }
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => continue,
                ErrorKind::WouldBlock => {
                    buffer.clear();
                    return Poll::Pending;
                }
                _ => {
                    buffer.clear();
                    return Poll::Ready(Err(error.into()));
                }
            },
        }
    }
}

fn advance_write<S>(
    descriptor: &mut Descriptor,
    transferred: &mut usize,
    io: &mut S,
) -> Poll<Result<usize, OperationError>>
where
    S: Write,
{
    let data = descriptor.data();

    while *transferred < data.len() {
        match io.write(&data[*transferred..]) {
            Ok(0) => return Poll::Ready(Err(OperationError::ConnectionLost)),
            Ok(count) => *transferred += count,
            Err(error) => match error.kind() {
                ErrorKind::Interrupted => continue,
                ErrorKind::WouldBlock => return Poll::Pending,
                _ => return Poll::Ready(Err(error.into())),
            },
        }
    }

    Poll::Ready(Ok(*transferred))
}

/// Result of an operation, owning the descriptor until the owner releases it.
pub struct Completion {
    pub kind: OperationKind,
    pub descriptor: Descriptor,
    pub result: Result<usize, OperationError>,
}

impl Completion {
    /// Bytes received by a successful read, empty otherwise.
    pub fn data(&self) -> &[u8] {
        match (self.kind, &self.result) {
            (OperationKind::Read, Ok(_)) => self.descriptor.data(),
            _ => &[],
        }
    }
}

/// Failure of a socket operation.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("connection lost")]
    ConnectionLost,
    #[error("another operation is already pending on this connection")]
    Busy,
    #[error("socket error")]
    Io(#[from] std::io::Error),
}

impl OperationError {
    /// Returns true if this means the peer is gone, rather than a local failure.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            OperationError::ConnectionLost => true,
            OperationError::Busy => false,
            OperationError::Io(error) => matches!(
                error.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ),
        }
    }
}

/// Misuse of an operation's single-shot completion.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("operation already completed")]
    AlreadyCompleted,
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, io};

    use super::*;
    use crate::CompletionPool;

    /// Scripted socket, every entry is the outcome of one call.
    #[derive(Default)]
    struct ScriptedIo {
        reads: VecDeque<io::Result<Vec<u8>>>,
        write_limits: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
    }

    impl Read for ScriptedIo {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(error)) => Err(error),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for ScriptedIo {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.write_limits.pop_front() {
                Some(Ok(limit)) => {
                    let count = limit.min(buf.len());
                    self.written.extend_from_slice(&buf[..count]);
                    Ok(count)
                }
                Some(Err(error)) => Err(error),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_pending_until_data() {
        let pool = CompletionPool::new(16);
        let mut io = ScriptedIo::default();
        let mut operation = Operation::read(pool.acquire(), 16);

        assert!(operation.advance(&mut io).is_pending());

        io.reads.push_back(Ok(b"abc".to_vec()));
        let result = operation.advance(&mut io);
        assert!(matches!(result, Poll::Ready(Ok(3))));

        let Poll::Ready(result) = result else { unreachable!() };
        let completion = operation.complete(result).expect("first completion");
        assert_eq!(completion.data(), b"abc");
        assert_eq!(completion.kind, OperationKind::Read);
    }

    #[test]
    fn read_end_of_stream_is_zero() {
        let pool = CompletionPool::new(16);
        let mut io = ScriptedIo::default();
        io.reads.push_back(Ok(Vec::new()));

        let mut operation = Operation::read(pool.acquire(), 16);
        assert!(matches!(operation.advance(&mut io), Poll::Ready(Ok(0))));
    }

    #[test]
    fn read_error_reported() {
        let pool = CompletionPool::new(16);
        let mut io = ScriptedIo::default();
        io.reads
            .push_back(Err(io::Error::from(ErrorKind::ConnectionReset)));

        let mut operation = Operation::read(pool.acquire(), 16);
        let Poll::Ready(Err(error)) = operation.advance(&mut io) else {
            panic!("expected failure");
        };
        assert!(error.is_connection_lost());
    }

    #[test]
    fn partial_writes_resolve_when_all_written() {
        let pool = CompletionPool::new(16);
        let mut io = ScriptedIo::default();
        io.write_limits.push_back(Ok(4));

        let mut descriptor = pool.acquire();
        descriptor.buffer_mut().extend_from_slice(b"hello world");
        let mut operation = Operation::write(descriptor);

        assert!(operation.advance(&mut io).is_pending());
        assert_eq!(operation.transferred(), 4);

        io.write_limits.push_back(Ok(100));
        assert!(matches!(operation.advance(&mut io), Poll::Ready(Ok(11))));
        assert_eq!(io.written, b"hello world");
    }

    #[test]
    fn write_zero_is_connection_lost() {
        let pool = CompletionPool::new(16);
        let mut io = ScriptedIo::default();
        io.write_limits.push_back(Ok(0));

        let mut descriptor = pool.acquire();
        descriptor.buffer_mut().extend_from_slice(b"x");
        let mut operation = Operation::write(descriptor);

        let Poll::Ready(Err(error)) = operation.advance(&mut io) else {
            panic!("expected failure");
        };
        assert!(error.is_connection_lost());
    }

    #[test]
    fn completes_exactly_once() {
        let pool = CompletionPool::new(16);
        let mut operation = Operation::read(pool.acquire(), 16);

        let completion = operation.complete(Err(OperationError::ConnectionLost));
        assert!(completion.is_ok());
        assert!(operation.is_completed());

        let second = operation.complete(Ok(0));
        assert!(matches!(second, Err(CompletionError::AlreadyCompleted)));
    }

    #[test]
    fn failed_completion_has_no_data() {
        let pool = CompletionPool::new(16);
        let mut descriptor = pool.acquire();
        descriptor.buffer_mut().extend_from_slice(b"stale");
        let mut operation = Operation::write(descriptor);

        let completion = operation
            .complete(Err(OperationError::ConnectionLost))
            .expect("first completion");
        assert!(completion.data().is_empty());
        assert_eq!(completion.descriptor.kind(), Some(OperationKind::Write));

        pool.release(completion.descriptor);
        assert_eq!(pool.idle(), 1);
    }
}
