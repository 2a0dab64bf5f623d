use thiserror::Error;

use crate::Response;

/// Error while framing, parsing, or serializing an HTTP message.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("malformed message: {0}")]
    Framing(#[from] FramingError),
    /// The peer closed the connection before starting a new message.
    #[error("connection lost")]
    ConnectionLost,
    #[error("unsupported transfer encoding \"{0}\"")]
    UnsupportedTransferEncoding(String),
    #[error("unsupported content encoding \"{0}\"")]
    UnsupportedEncoding(String),
    #[error("body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("body length mismatch, declared {expected} bytes but got {actual}")]
    BodyLength { expected: u64, actual: u64 },
    #[error("response already committed")]
    AlreadyCommitted,
    #[error("framing headers can't change after the body has been opened")]
    FramingFrozen,
    #[error("i/o error")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// Status of the error response to send for this error, if a response is still possible.
    pub fn status(&self) -> u16 {
        match self {
            HttpError::Framing(_) | HttpError::UnsupportedTransferEncoding(_) => 400,
            HttpError::BodyTooLarge { .. } => 413,
            HttpError::UnsupportedEncoding(_) => 415,
            _ => 500,
        }
    }

    /// Returns true if this error is attributable to the peer sending a bad message.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            HttpError::Framing(_) | HttpError::UnsupportedTransferEncoding(_)
        )
    }
}

/// Specific way a message failed to frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("line not well formed")]
    NotWellFormed,
    #[error("line exceeds buffer capacity")]
    LineTooLong,
    #[error("request line has no method")]
    MissingMethod,
    #[error("request line has no target")]
    MissingTarget,
    #[error("start line has no version")]
    MissingVersion,
    #[error("status code not well formed")]
    BadStatusCode,
    #[error("header line not well formed")]
    BadHeaderLine,
    #[error("content length not well formed")]
    BadContentLength,
    #[error("chunk not well formed")]
    BadChunk,
    #[error("compressed body not well formed")]
    BadEncoding,
    #[error("connection closed in the middle of a message")]
    UnexpectedEof,
}

/// Handler signal to answer a request with a specific response.
///
/// Returning this as an error from a handler is a normal outcome, the response is sent as if
/// the handler returned it.
#[derive(Error, Debug)]
#[error("respond with status {}", .0.status())]
pub struct Respond(pub Response);
