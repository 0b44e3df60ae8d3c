//! Request translation on an admitted session's main channel.
//!
//! Once the handshake admits a socket, a [`RequestHandler`] is registered on
//! its [`MAIN_CHANNEL`].  From then on the transport drives it directly: each
//! inbound message is decoded into a request, passed to the session's backend
//! [`Connection`], and the encoded response is returned as the reply to that
//! message.
//!
//! ```text
//! {"method":"GET","path":"/items/1","payload":""}
//!     → connection.handle(GET /items/1)
//!     → (200, "{\"id\":1}")
//!     → reply Ok {"status":200,"payload":"{\"id\":1}"}
//! ```
//!
//! The handler holds no lock.  The transport delivers one message at a time
//! per channel, so requests on a session are handled strictly in order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use sockrpc_core::protocol::{decode_request, encode_response};
use sockrpc_core::{ChannelHandler, ChannelReply, Connection, IncomingRequest, Socket, MAIN_CHANNEL};

/// Answers request messages for one admitted session.
pub struct RequestHandler {
    connection: Arc<dyn Connection>,
    remote_addr: String,
}

impl RequestHandler {
    pub fn new(connection: Arc<dyn Connection>, remote_addr: impl Into<String>) -> Self {
        Self {
            connection,
            remote_addr: remote_addr.into(),
        }
    }
}

#[async_trait]
impl ChannelHandler for RequestHandler {
    async fn on_read(&self, message_id: &str, data: String) -> ChannelReply {
        let payload = match decode_request(&data) {
            Ok(p) => p,
            Err(e) => {
                // The session stays open; only this message is refused.
                warn!(
                    "session {}: invalid request payload (message {message_id}): {e}",
                    self.remote_addr
                );
                return ChannelReply::invalid_payload();
            }
        };

        debug!(
            "session {}: {} {} (message {message_id})",
            self.remote_addr, payload.method, payload.path
        );

        let request = IncomingRequest::new(payload.method, payload.path, payload.payload);
        let response = self.connection.handle(request).await;
        let (status, body) = response.status_and_payload();

        debug!("session {}: responded {status}", self.remote_addr);
        ChannelReply::ok(encode_response(status, &body))
    }
}

/// Registers a [`RequestHandler`] for `connection` on the socket's main channel.
///
/// Called exactly once per admitted socket, by the handshake.
pub fn install_request_handler(socket: &dyn Socket, connection: Arc<dyn Connection>) {
    let handler = RequestHandler::new(connection, socket.remote_addr());
    socket.channel(MAIN_CHANNEL).on_read(Arc::new(handler));
}

// ── Tests ─────────────────────────────────────────────────────────────────────
