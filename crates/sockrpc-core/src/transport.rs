//! Socket transport abstraction.
//!
//! The bridge never frames bytes or routes channel messages itself.  It is
//! written against the traits in this module, which a concrete transport
//! (WebSocket, in-memory, ...) implements:
//!
//! - [`Transport`] announces newly accepted sockets and can be released.
//! - [`Socket`] is one persistent, bidirectional, message-oriented endpoint.
//! - [`Channel`] is a named sub-stream of a socket whose messages are answered
//!   one at a time by a registered [`ChannelHandler`].
//!
//! # Delivery contract
//!
//! A transport must deliver the messages of one channel to its handler
//! sequentially, in arrival order, awaiting each reply before delivering the
//! next message.  Handlers rely on this and take no locks of their own.
//! Different channels and different sockets may be served concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Name of the channel that carries request/response traffic after admission.
pub const MAIN_CHANNEL: &str = "m";

/// Fixed message sent with [`ReplyCode::Error`] when a request cannot be decoded.
pub const INVALID_PAYLOAD_MESSAGE: &str = "invalid payload";

/// Errors reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The socket has been closed, either by the peer or locally.
    #[error("socket closed")]
    Closed,

    /// No message arrived before the read deadline.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// Any other transport failure.
    #[error("transport I/O error: {0}")]
    Io(String),
}

// ── Channel replies ───────────────────────────────────────────────────────────

/// Outcome class of a channel reply.
///
/// On the wire the codes are `0` (ok) and `1` (error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// The message was handled; `data` carries the result.
    Ok,
    /// The message could not be handled; `data` carries a short reason.
    Error,
}

impl ReplyCode {
    /// Numeric wire representation.
    pub fn as_u8(self) -> u8 {
        match self {
            ReplyCode::Ok => 0,
            ReplyCode::Error => 1,
        }
    }

    /// Parses a numeric wire code.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReplyCode::Ok),
            1 => Some(ReplyCode::Error),
            _ => None,
        }
    }
}

/// The synchronous answer a [`ChannelHandler`] gives for one message.
///
/// The transport correlates the reply with the message that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReply {
    pub code: ReplyCode,
    pub data: String,
}

impl ChannelReply {
    /// A successful reply carrying `data`.
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            code: ReplyCode::Ok,
            data: data.into(),
        }
    }

    /// An error reply carrying a short reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            code: ReplyCode::Error,
            data: reason.into(),
        }
    }

    /// The acknowledgement sent when a request message cannot be decoded.
    pub fn invalid_payload() -> Self {
        Self::error(INVALID_PAYLOAD_MESSAGE)
    }

    /// Returns `true` for [`ReplyCode::Ok`].
    pub fn is_ok(&self) -> bool {
        self.code == ReplyCode::Ok
    }
}

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Handles the messages delivered on one channel.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Handles one message and returns the reply for it.
    ///
    /// `message_id` is the transport's correlation id, passed through for
    /// logging only.
    async fn on_read(&self, message_id: &str, data: String) -> ChannelReply;
}

/// A named sub-stream of a [`Socket`].
pub trait Channel: Send + Sync {
    /// The channel name.
    fn name(&self) -> &str;

    /// Registers the handler that answers every message on this channel.
    ///
    /// Messages that arrived before registration are delivered once a handler
    /// is registered.
    fn on_read(&self, handler: Arc<dyn ChannelHandler>);
}

/// A persistent, bidirectional, message-oriented transport endpoint.
///
/// Sockets are shared between the transport and the bridge as
/// `Arc<dyn Socket>`; the transport owns their lifetime.
#[async_trait]
pub trait Socket: Send + Sync {
    /// A transport-assigned identifier, used in log messages.
    fn id(&self) -> &str;

    /// The peer address as reported by the transport.
    fn remote_addr(&self) -> String;

    /// Reads the next socket-level message, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if the socket is closed,
    /// [`TransportError::Timeout`] if nothing arrived in time.
    async fn read(&self, timeout: Duration) -> Result<String, TransportError>;

    /// Writes one socket-level message.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if the socket is closed.
    async fn write(&self, message: String) -> Result<(), TransportError>;

    /// Returns the channel called `name`, creating it on first use.
    fn channel(&self, name: &str) -> Arc<dyn Channel>;

    /// Closes the socket.  Closing an already closed socket does nothing.
    fn close(&self);
}

/// Callback invoked by a [`Transport`] for every accepted socket.
///
/// The callback must return quickly; it runs on the transport's accept path.
pub type NewSocketHandler = Box<dyn Fn(Arc<dyn Socket>) + Send + Sync>;

/// Source of newly accepted sockets.
pub trait Transport: Send + Sync {
    /// Registers the callback for newly accepted sockets, replacing any
    /// previous one.
    fn on_new_socket(&self, handler: NewSocketHandler);

    /// Stops accepting sockets and releases transport resources.
    fn release(&self);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
