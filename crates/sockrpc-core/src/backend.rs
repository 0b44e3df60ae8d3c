//! RPC backend abstraction.
//!
//! The backend decides whether a socket may open a session ([`Backend`]) and
//! answers the requests sent on an admitted session ([`Connection`]).  The
//! bridge only adapts message shapes; routing and handler dispatch live
//! entirely behind these traits.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::payload::ConnectionHeaders;

/// Request headers in the multi-valued form backends expect.
pub type HeaderMap = HashMap<String, Vec<String>>;

/// Proposed session, built once per handshake and consumed by
/// [`Backend::new_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Peer address as reported by the transport.
    pub remote_addr: String,
    /// Headers from the connection message.
    pub headers: HeaderMap,
}

impl ConnectionRequest {
    /// Builds a request from single-valued connection headers.
    ///
    /// Every header value becomes a one-element list, so a connection message
    /// with N entries yields exactly N keys.
    pub fn from_headers(remote_addr: impl Into<String>, headers: ConnectionHeaders) -> Self {
        let headers = headers
            .into_iter()
            .map(|(key, value)| (key, vec![value]))
            .collect();
        Self {
            remote_addr: remote_addr.into(),
            headers,
        }
    }

    /// Returns the first value of header `name`, if present.
    ///
    /// Header names are compared ASCII case-insensitively, as in HTTP.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// A status and body produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    status: u16,
    payload: String,
}

impl BackendResponse {
    pub fn new(status: u16, payload: impl Into<String>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Splits the response into its status and body.
    pub fn status_and_payload(&self) -> (u16, String) {
        (self.status, self.payload.clone())
    }
}

/// One request forwarded to a [`Connection`].
pub struct IncomingRequest {
    /// HTTP-style method.
    pub method: String,
    /// Request URI, including any query string.
    pub request_uri: String,
    /// Request body as a byte stream.
    pub payload: Box<dyn Read + Send>,
}

impl IncomingRequest {
    /// Builds a request whose body streams the bytes of `payload`.
    pub fn new(
        method: impl Into<String>,
        request_uri: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            request_uri: request_uri.into(),
            payload: Box::new(Cursor::new(payload.into().into_bytes())),
        }
    }

    /// Drains the body into a string.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the body is not valid UTF-8.
    pub fn read_payload_to_string(&mut self) -> std::io::Result<String> {
        let mut body = String::new();
        self.payload.read_to_string(&mut body)?;
        Ok(body)
    }
}

impl fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("method", &self.method)
            .field("request_uri", &self.request_uri)
            .finish_non_exhaustive()
    }
}

/// The backend's admission decision.
pub enum Admission {
    /// The session is authorized; all its requests go to this connection.
    Admitted(Arc<dyn Connection>),
    /// The session is refused; the response is written back to the client.
    Rejected(BackendResponse),
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Admitted(_) => f.write_str("Admitted"),
            Admission::Rejected(res) => f.debug_tuple("Rejected").field(res).finish(),
        }
    }
}

/// Authorizes new sessions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Decides whether the proposed session may open.
    async fn new_connection(&self, request: ConnectionRequest) -> Admission;
}

/// A backend session handle, one per admitted socket.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Answers one request.
    async fn handle(&self, request: IncomingRequest) -> BackendResponse;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
