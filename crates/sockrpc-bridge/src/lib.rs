//! sockrpc-bridge library crate.
//!
//! This crate bridges persistent, multiplexed sockets to a request/response
//! RPC backend.  Each socket authorizes itself once with a connection
//! handshake and then carries many sequential requests on its main channel.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Client (JSON messages over a socket transport)
//!         ↕
//! [sockrpc-bridge]
//!   ├── domain/           BridgeConfig and its file representation
//!   ├── application/      Handshake, request handler, admission supervisor, Bridge
//!   └── infrastructure/
//!         ├── ws_transport/     WebSocket transport (tokio-tungstenite)
//!         ├── memory_transport/ In-process transport for tests and embedding
//!         ├── channel/          Sequential per-channel dispatch shared by both
//!         └── echo_backend/     Demo backend used by the binary
//!         ↕
//! RPC backend (sockrpc_core::Backend / Connection)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async code.
//! - `application` depends on `domain` and the `sockrpc-core` traits only; it
//!   never names a concrete transport or backend.
//! - `infrastructure` implements those traits with `tokio` and `tungstenite`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: the admission and request translation protocol.
pub mod application;

/// Infrastructure layer: concrete transports and the demo backend.
pub mod infrastructure;

pub use application::Bridge;
pub use domain::BridgeConfig;
