use crate::{
    message::{Framing, Headers, StartLine},
    Framer, FramingError, HttpError,
};

/// Start line, header block, and resolved framing of a message.
#[derive(Debug, Clone)]
pub struct MessageHead<L> {
    pub line: L,
    pub headers: Headers,
    pub framing: Framing,
}

/// Incremental parser of a message head.
///
/// Keeps its progress between calls, so a head split across any number of socket reads is
/// assembled as lines become available.
pub struct HeadParser<L> {
    line: Option<L>,
    headers: Headers,
}

impl<L> Default for HeadParser<L> {
    fn default() -> Self {
        Self {
            line: None,
            headers: Headers::new(),
        }
    }
}

impl<L: StartLine> HeadParser<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume lines from the framer until the head is complete.
    ///
    /// Returns `None` if the framer needs a refill first.
    pub fn parse(&mut self, framer: &mut Framer) -> Result<Option<MessageHead<L>>, HttpError> {
        while let Some(line) = framer.read_line()? {
            if let Some(head) = self.push_line(&line)? {
                return Ok(Some(head));
            }
        }

        Ok(None)
    }

    /// Consume a single line, returning the head once its terminating empty line is seen.
    pub fn push_line(&mut self, line: &str) -> Result<Option<MessageHead<L>>, HttpError> {
        if self.line.is_none() {
            // Tolerate empty lines before the start line
            if !line.is_empty() {
                self.line = Some(L::parse(line)?);
            }
            return Ok(None);
        }

        if !line.is_empty() {
            self.headers.push_line(line)?;
            return Ok(None);
        }

        self.ready().map(Some)
    }

    /// Returns true if the start line has been parsed.
    pub fn has_start_line(&self) -> bool {
        self.line.is_some()
    }

    fn ready(&mut self) -> Result<MessageHead<L>, HttpError> {
        let headers = std::mem::take(&mut self.headers);
        let framing = Framing::from_fields(headers.iter())?;

        // Only reachable after a start line was parsed, checked by the caller
        let line = self
            .line
            .take()
            .ok_or(FramingError::NotWellFormed)?;

        Ok(MessageHead {
            line,
            headers,
            framing,
        })
    }
}
