use std::{
    borrow::Cow,
    fmt::{self, Debug},
    io::{ErrorKind, Read, Write},
    time::SystemTime,
};

use bytes::Bytes;

use crate::{
    body::BodyWriter,
    message::{AcceptEncoding, Framing, StatusLine},
    HttpError,
};

/// Header slots every response starts with, fixing the order they're emitted in.
const DECLARED: [&str; 15] = [
    "Cache-Control",
    "Pragma",
    "Content-Type",
    "Expires",
    "Content-Length",
    "Content-Encoding",
    "Content-Range",
    "Transfer-Encoding",
    "Server",
    "X-Powered-By",
    "Location",
    "Date",
    "Sec-WebSocket-Accept",
    "Upgrade",
    "Connection",
];

/// Ordered header slots of a response.
///
/// A slot keeps its position when its value is set later, and slots without a value are
/// skipped when the response is committed.
#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    slots: Vec<(Cow<'static, str>, Option<String>)>,
}

impl Default for ResponseHeaders {
    fn default() -> Self {
        let slots = DECLARED
            .iter()
            .map(|name| (Cow::Borrowed(*name), None))
            .collect();

        Self { slots }
    }
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value of a header, in the position of its first slot.
    ///
    /// Any later slots with the same name are unset.
    pub fn set(&mut self, name: impl Into<Cow<'static, str>>, value: impl Into<String>) {
        let name = name.into();
        let mut value = Some(value.into());

        for (slot, slot_value) in &mut self.slots {
            if slot.eq_ignore_ascii_case(&name) {
                *slot_value = value.take();
            }
        }

        if value.is_some() {
            self.slots.push((name, value));
        }
    }

    /// Add a header in a new slot after all existing ones, keeping previous values.
    pub fn append(&mut self, name: impl Into<Cow<'static, str>>, value: impl Into<String>) {
        self.slots.push((name.into(), Some(value.into())));
    }

    /// Unset every slot with the given name, keeping the slots in place.
    pub fn clear(&mut self, name: &str) {
        for (slot, value) in &mut self.slots {
            if slot.eq_ignore_ascii_case(name) {
                *value = None;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(slot, _)| slot.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Headers with a value, in emission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.slots
            .iter()
            .filter_map(|(name, value)| value.as_deref().map(|value| (name.as_ref(), value)))
    }
}

/// Source of a response's entity body.
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    /// External byte source, such as a file.
    Reader(Box<dyn Read + Send + Sync>),
}

impl ResponseBody {
    /// Fill `block` with up to `max` bytes of the body, returning false once it's exhausted.
    pub fn next_block(&mut self, max: usize, block: &mut Vec<u8>) -> Result<bool, HttpError> {
        block.clear();

        match self {
            ResponseBody::Empty => Ok(false),
            ResponseBody::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Ok(false);
                }

                let count = max.min(bytes.len());
                block.extend_from_slice(&bytes.split_to(count));
                Ok(true)
            }
            ResponseBody::Reader(source) => {
                block.resize(max, 0);

                loop {
                    match source.read(&mut block[..]) {
                        Ok(count) => {
                            block.truncate(count);
                            return Ok(count > 0);
                        }
                        Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                        Err(error) => {
                            block.clear();
                            return Err(error.into());
                        }
                    }
                }
            }
        }
    }
}

impl Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ResponseBody::Reader(_) => f.write_str("Reader"),
        }
    }
}

/// An HTTP response, built by a handler and committed by the connection.
#[derive(Debug)]
pub struct Response {
    line: StatusLine,
    headers: ResponseHeaders,
    body: ResponseBody,
    compress: bool,
    committed: bool,
}

impl Response {
    /// Create a response with no body.
    pub fn new(status: u16) -> Self {
        let mut headers = ResponseHeaders::new();
        headers.set("Date", httpdate::fmt_http_date(SystemTime::now()));

        // Interim and bodiless statuses never carry a length
        if !(status < 200 || status == 204 || status == 304) {
            headers.set("Content-Length", "0");
        }

        Self {
            line: StatusLine::new(status),
            headers,
            body: ResponseBody::Empty,
            compress: false,
            committed: false,
        }
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        let body = Bytes::from(text.into());
        Self::new(status).with_body("text/plain; charset=utf-8", body)
    }

    pub fn html(status: u16, html: impl Into<String>) -> Self {
        let body = Bytes::from(html.into());
        Self::new(status).with_body("text/html; charset=utf-8", body)
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(302).header("Location", location)
    }

    /// Error response, closing the connection for failures other than not-found.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        let response = Self::text(status, message);

        if status >= 400 && status != 404 {
            return response.header("Connection", "close");
        }
        response
    }

    /// Response streaming `len` bytes from an external source.
    pub fn stream(mime: &str, len: u64, source: impl Read + Send + Sync + 'static) -> Self {
        let mut response = Self::new(200).header("Content-Type", mime.to_string());
        response.headers.set("Content-Length", len.to_string());
        response.body = ResponseBody::Reader(Box::new(source));
        response
    }

    /// Response streaming an external source of unknown length, with chunked framing.
    pub fn chunked(mime: &str, source: impl Read + Send + Sync + 'static) -> Self {
        let mut response = Self::new(200).header("Content-Type", mime.to_string());
        response.headers.clear("Content-Length");
        response.headers.set("Transfer-Encoding", "chunked");
        response.body = ResponseBody::Reader(Box::new(source));
        response
    }

    /// Replace the body with in-memory bytes.
    pub fn with_body(mut self, mime: &str, body: impl Into<Bytes>) -> Self {
        let body = body.into();

        self.headers.set("Content-Type", mime.to_string());
        self.headers.clear("Transfer-Encoding");
        self.headers.set("Content-Length", body.len().to_string());
        self.body = ResponseBody::Bytes(body);
        self
    }

    /// Set a header, builder style.
    pub fn header(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Opt in to compressing the body, if the client accepts a supported coding.
    pub fn compress(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn status(&self) -> u16 {
        self.line.code
    }

    pub fn line(&self) -> &StatusLine {
        &self.line
    }

    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    /// Mutable headers, available until the response is committed.
    pub fn headers_mut(&mut self) -> Result<&mut ResponseHeaders, HttpError> {
        if self.committed {
            return Err(HttpError::FramingFrozen);
        }

        Ok(&mut self.headers)
    }

    /// Returns true unless the response asks for the connection to be closed.
    pub fn keep_alive(&self) -> bool {
        !self.headers.get("connection").map_or(false, |value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("close"))
        })
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        let value = if keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", value);
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Take the body source out, for writing it after commit.
    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Empty)
    }

    /// Switch to a compressed, chunked body if requested and the client supports it.
    pub(crate) fn negotiate_encoding(&mut self, accept: AcceptEncoding) {
        if !self.compress || matches!(self.body, ResponseBody::Empty) {
            return;
        }

        let Some(encoding) = accept.preferred() else {
            return;
        };
        let Some(value) = encoding.as_header() else {
            return;
        };

        // The compressed length isn't known up front
        self.headers.set("Content-Encoding", value.to_string());
        self.headers.clear("Content-Length");
        self.headers.set("Transfer-Encoding", "chunked");
    }

    /// Serialize the status line and headers, returning the writer for the body.
    ///
    /// A response can only be committed once.
    pub fn commit(&mut self, out: &mut Vec<u8>) -> Result<BodyWriter, HttpError> {
        if self.committed {
            return Err(HttpError::AlreadyCommitted);
        }

        let framing = Framing::from_fields(self.headers.iter())?;
        let writer = BodyWriter::open(&framing)?;

        write!(out, "{}\r\n", self.line)?;
        for (name, value) in self.headers.iter() {
            write!(out, "{}: {}\r\n", name, value)?;
        }
        out.extend_from_slice(b"\r\n");

        self.committed = true;
        Ok(writer)
    }
}
