//! # sockrpc-core
//!
//! Shared library for the sockrpc bridge containing the JSON payload codec,
//! the collaborator traits the bridge is written against, and the small value
//! types that flow between them.
//!
//! This crate has no dependency on an async runtime, a network stack, or a
//! concrete transport.  Anything that can carry discrete text messages over
//! named channels can implement [`Socket`]; anything that can authorize a
//! session and answer HTTP-like requests can implement [`Backend`].
//!
//! # Architecture overview
//!
//! The bridge sits between two external systems:
//!
//! ```text
//! Client  ── socket transport (messages, named channels) ──▶  [bridge]  ──▶  RPC backend
//!         ◀─────────────── channel replies ──────────────────           ◀──  responses
//! ```
//!
//! This crate defines:
//!
//! - **`protocol`** – The wire payloads carried inside transport messages:
//!   the connection headers sent during the handshake, request payloads, and
//!   response payloads.  All of them are JSON documents.
//!
//! - **`transport`** – The `Transport` / `Socket` / `Channel` traits and the
//!   [`ChannelReply`] convention used to answer channel messages.
//!
//! - **`backend`** – The `Backend` / `Connection` traits plus the
//!   [`ConnectionRequest`], [`IncomingRequest`], and [`BackendResponse`]
//!   values exchanged with the RPC backend.
//!
//! - **`namespace`** – Normalization of the mount path the transport serves.

pub mod backend;
pub mod namespace;
pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `sockrpc_core::Socket` instead of `sockrpc_core::transport::Socket`.
pub use backend::{
    Admission, Backend, BackendResponse, Connection, ConnectionRequest, HeaderMap, IncomingRequest,
};
pub use namespace::{namespace_matches, normalize_namespace};
pub use protocol::payload::{
    decode_headers, decode_request, encode_response, ConnectionHeaders, PayloadError,
    RequestPayload, ResponsePayload,
};
pub use transport::{
    Channel, ChannelHandler, ChannelReply, NewSocketHandler, ReplyCode, Socket, Transport,
    TransportError, INVALID_PAYLOAD_MESSAGE, MAIN_CHANNEL,
};
