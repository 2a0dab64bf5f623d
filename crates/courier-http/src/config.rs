/// Configuration for HTTP connections.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Requests served on a single connection before it is closed.
    pub max_requests_per_connection: usize,
    /// Capacity of the per-connection read buffer, also the longest accepted line.
    pub buffer_size: usize,
    /// Largest request body passed to the handler.
    pub max_body_size: usize,
    /// Whether to accept WebSocket upgrade requests.
    pub websocket: bool,
    /// Value of the `Server` header, omitted if `None`.
    pub server_name: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_requests_per_connection: 20,
            buffer_size: 32 * 1024,
            max_body_size: 16 * 1024 * 1024,
            websocket: true,
            server_name: None,
        }
    }
}

impl HttpConfig {
    pub fn max_requests_per_connection(mut self, max: usize) -> Self {
        self.max_requests_per_connection = max;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn websocket(mut self, enabled: bool) -> Self {
        self.websocket = enabled;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}
