//! JSON codec for the payloads carried inside transport messages.
//!
//! Wire shapes (one transport message = one JSON document):
//!
//! ```text
//! connection message:  {"authorization":"Bearer abc","x-client":"web"}
//! request message:     {"method":"GET","path":"/items/1","payload":""}
//! response message:    {"status":200,"payload":"{\"id\":1}"}
//! ```
//!
//! The connection message is a flat object of string values.  Request and
//! response payloads carry their body as a JSON *string*, so a JSON body is
//! double-encoded on the wire.
//!
//! Decoding is fallible and reports [`PayloadError::Malformed`].  Encoding a
//! response is not: the response shape is a fixed struct of an integer and a
//! string, so a serializer failure can only mean a bug in this module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Headers sent by the client in its connection message, one value per key.
pub type ConnectionHeaders = HashMap<String, String>;

/// Errors that can occur while decoding a payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// The message is not valid JSON or does not have the expected structure.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Malformed(err.to_string())
    }
}

/// A single request sent by the client on the main channel.
///
/// Missing fields decode as empty strings and unknown fields are ignored, so
/// a client may omit `payload` for body-less requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPayload {
    /// HTTP-style method, e.g. `GET` or `POST`.
    pub method: String,
    /// Request URI relative to the backend root, e.g. `/items/1?full=true`.
    pub path: String,
    /// Request body.
    pub payload: String,
}

/// The reply to a request, or the rejection written during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// HTTP-style status code chosen by the backend.
    pub status: u16,
    /// Response body.
    pub payload: String,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes the connection message sent as the first message on a socket.
///
/// # Errors
///
/// Returns [`PayloadError::Malformed`] if `message` is not a JSON object whose
/// values are all strings.
///
/// # Examples
///
/// ```rust
/// use sockrpc_core::protocol::decode_headers;
///
/// let headers = decode_headers(r#"{"authorization":"Bearer abc"}"#).unwrap();
/// assert_eq!(headers["authorization"], "Bearer abc");
/// assert!(decode_headers(r#"{"retries":3}"#).is_err());
/// ```
pub fn decode_headers(message: &str) -> Result<ConnectionHeaders, PayloadError> {
    Ok(serde_json::from_str(message)?)
}

/// Decodes one request message received on the main channel.
///
/// # Errors
///
/// Returns [`PayloadError::Malformed`] if `message` is not a JSON object or if
/// a known field has the wrong type.
///
/// # Examples
///
/// ```rust
/// use sockrpc_core::protocol::decode_request;
///
/// let req = decode_request(r#"{"method":"GET","path":"/items/1","payload":""}"#).unwrap();
/// assert_eq!(req.method, "GET");
/// assert_eq!(req.path, "/items/1");
/// ```
pub fn decode_request(message: &str) -> Result<RequestPayload, PayloadError> {
    Ok(serde_json::from_str(message)?)
}

/// Encodes a backend response as a response message.
///
/// # Panics
///
/// Panics if serialization fails.  [`ResponsePayload`] contains only an
/// integer and a string, so a failure here is a defect in this codec rather
/// than a runtime condition, and is not something a caller could recover from.
///
/// # Examples
///
/// ```rust
/// use sockrpc_core::protocol::encode_response;
///
/// let msg = encode_response(200, r#"{"id":1}"#);
/// assert_eq!(msg, r#"{"status":200,"payload":"{\"id\":1}"}"#);
/// ```
pub fn encode_response(status: u16, payload: &str) -> String {
    let response = ResponsePayload {
        status,
        payload: payload.to_string(),
    };
    match serde_json::to_string(&response) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!("response payload failed to encode: {e}");
            panic!("response payload failed to encode: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
