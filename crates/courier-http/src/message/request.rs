use std::net::SocketAddr;

use bytes::Bytes;

use crate::{
    message::{AcceptEncoding, ContentType, Framing, Headers, MessageHead, RequestLine},
    HttpError,
};

const FRAMING_HEADERS: [&str; 4] = [
    "content-length",
    "transfer-encoding",
    "content-type",
    "content-encoding",
];

/// A received HTTP request, with its entity body decoded.
#[derive(Debug, Clone)]
pub struct Request {
    head: MessageHead<RequestLine>,
    body: Bytes,
    frozen: bool,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(head: MessageHead<RequestLine>) -> Self {
        Self {
            head,
            body: Bytes::new(),
            frozen: false,
            remote_addr: None,
        }
    }

    /// Attach the decoded body, freezing the framing headers it was read with.
    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
        self.frozen = true;
    }

    pub(crate) fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn line(&self) -> &RequestLine {
        &self.head.line
    }

    pub fn method(&self) -> &str {
        &self.head.line.method
    }

    /// Request target as sent, including any query.
    pub fn target(&self) -> &str {
        &self.head.line.target
    }

    pub fn path(&self) -> &str {
        let target = self.target();
        target.split_once('?').map_or(target, |(path, _)| path)
    }

    /// Query part of the target, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.target().split_once('?').map(|(_, query)| query)
    }

    pub fn version(&self) -> &str {
        &self.head.line.version
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name)
    }

    /// Set a header, failing for framing headers once the body has been read.
    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HttpError> {
        let name = name.into();

        let framing = FRAMING_HEADERS
            .iter()
            .any(|header| name.eq_ignore_ascii_case(header));
        if self.frozen && framing {
            return Err(HttpError::FramingFrozen);
        }

        self.head.headers.set(name, value);
        if framing {
            self.head.framing = Framing::from_fields(self.head.headers.iter())?;
        }

        Ok(())
    }

    pub fn framing(&self) -> &Framing {
        &self.head.framing
    }

    pub fn content_length(&self) -> Option<u64> {
        self.head.framing.content_length
    }

    pub fn content_type(&self) -> Option<&ContentType> {
        self.head.framing.content_type.as_ref()
    }

    pub fn boundary(&self) -> Option<&str> {
        self.content_type().and_then(ContentType::boundary)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type().map_or(false, ContentType::is_multipart)
    }

    /// Returns true if the client wants the connection kept open after this request.
    ///
    /// HTTP/1.1 is persistent unless the client sends `close`, HTTP/1.0 only with an explicit
    /// `keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection");

        if self.version().eq_ignore_ascii_case("HTTP/1.0") {
            return connection.map_or(false, |value| has_token(value, "keep-alive"));
        }

        !connection.map_or(false, |value| has_token(value, "close"))
    }

    /// Returns true if this is a WebSocket upgrade request.
    pub fn is_websocket(&self) -> bool {
        let upgrade = self
            .header("connection")
            .map_or(false, |value| has_token(value, "upgrade"));
        let websocket = self
            .header("upgrade")
            .map_or(false, |value| value.trim().eq_ignore_ascii_case("websocket"));

        upgrade && websocket
    }

    pub fn accept_encoding(&self) -> AcceptEncoding {
        self.header("accept-encoding")
            .map(AcceptEncoding::parse)
            .unwrap_or_default()
    }

    /// Decoded entity body, empty if the request had none.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Check a comma separated header value for a token, ignoring case.
fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::HeadParser, Framer};

    fn request(head: &str) -> Request {
        let mut framer = Framer::new(1024);
        framer.fill(head.as_bytes());

        let head = HeadParser::new().parse(&mut framer).unwrap().unwrap();
        Request::new(head)
    }

    #[test]
    fn path_and_query_split() {
        let request = request("GET /search?q=rust&page=2 HTTP/1.1\r\n\r\n");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query(), Some("q=rust&page=2"));

        let request = request_no_query();
        assert_eq!(request.path(), "/plain");
        assert_eq!(request.query(), None);
    }

    fn request_no_query() -> Request {
        request("GET /plain HTTP/1.1\r\n\r\n")
    }

    #[test]
    fn keep_alive_per_version() {
        assert!(request("GET / HTTP/1.1\r\n\r\n").keep_alive());
        assert!(!request("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").keep_alive());
        assert!(!request("GET / HTTP/1.0\r\n\r\n").keep_alive());
        assert!(request("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").keep_alive());
    }

    #[test]
    fn websocket_upgrade_detected() {
        let request = request(
            "GET /chat HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\nUpgrade: websocket\r\n\r\n",
        );
        assert!(request.is_websocket());

        let request = request_no_query();
        assert!(!request.is_websocket());
    }

    #[test]
    fn framing_headers_frozen_after_body() {
        let mut request = request("POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\n");
        request.set_header("Content-Length", "4").unwrap();
        assert_eq!(request.content_length(), Some(4));

        request.set_body(Bytes::from_static(b"abcd"));

        let result = request.set_header("content-length", "1");
        assert!(matches!(result, Err(HttpError::FramingFrozen)));
        request.set_header("X-Trace", "1").unwrap();
        assert_eq!(request.header("x-trace"), Some("1"));
    }
}
