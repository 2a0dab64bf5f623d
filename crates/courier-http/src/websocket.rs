use base64::Engine;
use sha1::{Digest, Sha1};

use crate::{Request, Response};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` token for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(GUID.as_bytes());
    let hash = hasher.finalize();

    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Build the response to a WebSocket upgrade request.
///
/// Returns a `101 Switching Protocols` if the request carries a key, a `400` otherwise.
pub fn handshake_response(request: &Request) -> Result<Response, Response> {
    let Some(key) = request
        .header("sec-websocket-key")
        .filter(|key| !key.trim().is_empty())
    else {
        return Err(Response::error(400, "missing Sec-WebSocket-Key"));
    };

    let response = Response::new(101)
        .header("Sec-WebSocket-Accept", accept_key(key))
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade");
    Ok(response)
}
