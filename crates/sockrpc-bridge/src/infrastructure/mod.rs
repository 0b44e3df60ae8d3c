//! Infrastructure layer for sockrpc-bridge.
//!
//! The infrastructure layer holds the concrete collaborators the application
//! layer is written against.
//!
//! # Responsibilities
//!
//! - Accepting WebSocket connections and exposing them as sockets
//!   ([`WsTransport`])
//! - Framing socket-level messages and channel traffic as JSON envelopes
//! - Sequential per-channel delivery ([`SerialChannel`])
//! - An in-process transport for tests and embedding ([`MemoryTransport`])
//! - A demonstration backend ([`EchoBackend`])
//!
//! # What does NOT belong here?
//!
//! - The handshake and request translation (that is the application layer)
//! - Configuration types (that is the domain layer)
//! - Command-line parsing (that is done in `main.rs`)

pub mod channel;
pub mod echo_backend;
pub mod memory_transport;
pub mod ws_transport;

pub use channel::{CloseFlag, SerialChannel};
pub use echo_backend::{EchoBackend, EchoConnection};
pub use memory_transport::{MemoryClient, MemorySocket, MemoryTransport};
pub use ws_transport::{Envelope, WsSocket, WsTransport};
