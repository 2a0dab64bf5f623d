use bytes::{Buf, Bytes, BytesMut};

use crate::{FramingError, HttpError};

/// Read-ahead buffer of a connection, shared by the line reader and the body readers.
///
/// The framer never touches the socket itself. When it runs dry, `read_line` returns `None` and
/// the owner fills it with the next socket read, resuming where it left off. Unconsumed bytes
/// are preserved across refills, so data belonging to the next message stays valid.
pub struct Framer {
    buffer: BytesMut,
    capacity: usize,
    /// Bytes at the front of the buffer already known not to contain a line feed.
    scanned: usize,
    eof: bool,
    seen: bool,
}

impl Framer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            scanned: 0,
            eof: false,
            seen: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// How many more bytes `fill` can currently accept.
    pub fn spare_capacity(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// Append received bytes, returning how many were accepted.
    pub fn fill(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.spare_capacity());
        self.buffer.extend_from_slice(&data[..count]);
        count
    }

    /// Record that the peer will not send anything more.
    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Start tracking a new message, for classifying connection loss.
    pub fn begin_message(&mut self) {
        self.seen = false;
    }

    /// Returns true if any byte of the current message has been received.
    pub fn has_seen_message(&self) -> bool {
        self.seen || !self.buffer.is_empty()
    }

    /// Read the next CRLF terminated line, with the terminator stripped.
    ///
    /// Returns `None` if no full line is buffered yet, and the framer needs a refill.
    pub fn read_line(&mut self) -> Result<Option<String>, HttpError> {
        let found = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n');

        let Some(offset) = found else {
            self.scanned = self.buffer.len();

            if self.buffer.len() >= self.capacity {
                return Err(FramingError::LineTooLong.into());
            }

            if self.eof {
                return Err(self.eof_error());
            }

            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;

        if end == 0 || self.buffer[end - 1] != b'\r' {
            return Err(FramingError::NotWellFormed.into());
        }

        let line = self.buffer.split_to(end + 1);
        let line = String::from_utf8(line[..end - 1].to_vec())
            .map_err(|_| FramingError::NotWellFormed)?;

        if !line.is_empty() {
            self.seen = true;
        }

        Ok(Some(line))
    }

    /// Move up to `max` buffered bytes into `out`, returning how many were moved.
    pub fn read_bytes(&mut self, out: &mut Vec<u8>, max: usize) -> usize {
        let count = max.min(self.buffer.len());
        out.extend_from_slice(&self.buffer[..count]);
        self.consume(count);
        count
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        if self.buffer.is_empty() {
            return None;
        }

        self.seen = true;
        self.scanned = self.scanned.saturating_sub(1);
        Some(self.buffer.get_u8())
    }

    /// Discard up to `max` buffered bytes, returning how many were discarded.
    pub fn skip(&mut self, max: usize) -> usize {
        let count = max.min(self.buffer.len());
        self.consume(count);
        count
    }

    /// Take everything still buffered, for handing the raw connection over to another protocol.
    pub fn take_remaining(&mut self) -> Bytes {
        self.scanned = 0;
        self.buffer.split().freeze()
    }

    /// Error for running out of data, distinguishing a clean close between messages.
    pub(crate) fn eof_error(&self) -> HttpError {
        if self.has_seen_message() {
            FramingError::UnexpectedEof.into()
        } else {
            HttpError::ConnectionLost
        }
    }

    fn consume(&mut self, count: usize) {
        if count == 0 {
            return;
        }

        self.seen = true;
        self.scanned = self.scanned.saturating_sub(count);
        self.buffer.advance(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer_with(data: &[u8]) -> Framer {
        let mut framer = Framer::new(64);
        assert_eq!(framer.fill(data), data.len());
        framer
    }

    #[test]
    fn buffered_lines_need_no_refill() {
        let mut framer = framer_with(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");

        assert_eq!(framer.read_line().unwrap().as_deref(), Some("GET / HTTP/1.1"));
        assert_eq!(framer.read_line().unwrap().as_deref(), Some("Host: a"));
        assert_eq!(framer.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(framer.read_line().unwrap(), None);
    }

    #[test]
    fn line_assembled_from_single_byte_deliveries() {
        let line = b"Content-Type: text/plain; charset=utf-8\r\n";

        // Every split point, down to one byte per delivery
        for step in 1..=line.len() {
            let mut framer = Framer::new(64);
            let mut result = None;

            for chunk in line.chunks(step) {
                assert!(result.is_none());
                framer.fill(chunk);
                result = framer.read_line().unwrap();
            }

            assert_eq!(
                result.as_deref(),
                Some("Content-Type: text/plain; charset=utf-8")
            );
        }
    }

    #[test]
    fn split_terminator_assembled() {
        let mut framer = framer_with(b"abc\r");
        assert_eq!(framer.read_line().unwrap(), None);

        framer.fill(b"\ndef");
        assert_eq!(framer.read_line().unwrap().as_deref(), Some("abc"));
        assert_eq!(framer.buffered(), 3);
    }

    #[test]
    fn bare_line_feed_rejected() {
        let mut framer = framer_with(b"abc\n");

        let error = framer.read_line().unwrap_err();
        assert!(matches!(error, HttpError::Framing(FramingError::NotWellFormed)));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut framer = framer_with(b"X-Name: caf\xff\xfe\r\nHost: a\r\n");

        let error = framer.read_line().unwrap_err();
        assert!(matches!(error, HttpError::Framing(FramingError::NotWellFormed)));
    }

    #[test]
    fn line_too_long_rejected() {
        let mut framer = Framer::new(16);
        framer.fill(&[b'a'; 32]);
        assert_eq!(framer.spare_capacity(), 0);

        let error = framer.read_line().unwrap_err();
        assert!(matches!(error, HttpError::Framing(FramingError::LineTooLong)));
    }

    #[test]
    fn eof_before_message_is_connection_lost() {
        let mut framer = Framer::new(16);
        framer.mark_eof();

        let error = framer.read_line().unwrap_err();
        assert!(matches!(error, HttpError::ConnectionLost));
    }

    #[test]
    fn eof_mid_message_is_framing_error() {
        let mut framer = framer_with(b"GET / HT");
        framer.mark_eof();

        let error = framer.read_line().unwrap_err();
        assert!(matches!(error, HttpError::Framing(FramingError::UnexpectedEof)));
    }

    #[test]
    fn bytes_drained_before_lines_resume() {
        let mut framer = framer_with(b"hello\r\nnext\r\n");

        let mut out = Vec::new();
        assert_eq!(framer.read_bytes(&mut out, 5), 5);
        assert_eq!(out, b"hello");
        assert_eq!(framer.read_byte(), Some(b'\r'));
        assert_eq!(framer.read_byte(), Some(b'\n'));

        assert_eq!(framer.read_line().unwrap().as_deref(), Some("next"));
        assert_eq!(framer.read_byte(), None);
    }

    #[test]
    fn consumed_space_reusable() {
        let mut framer = Framer::new(8);
        framer.fill(b"ab\r\ncd\r\n");
        assert_eq!(framer.spare_capacity(), 0);

        framer.read_line().unwrap();
        assert_eq!(framer.spare_capacity(), 4);
        assert_eq!(framer.fill(b"ef\r\n!!"), 4);
    }

    #[test]
    fn remaining_taken_for_handover() {
        let mut framer = framer_with(b"done\r\n\x81\x05");
        framer.read_line().unwrap();

        assert_eq!(&framer.take_remaining()[..], b"\x81\x05");
        assert_eq!(framer.buffered(), 0);
    }
}
