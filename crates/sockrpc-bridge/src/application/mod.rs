//! Application layer for sockrpc-bridge.
//!
//! The application layer implements the admission and request translation
//! protocol against the `sockrpc-core` traits.  It knows *what* to do with a
//! socket, but never *how* bytes reach it.
//!
//! # Responsibilities
//!
//! - Running the connection handshake on each new socket (`handshake`)
//! - Answering request messages on admitted sessions (`request_handler`)
//! - Dispatching handshakes without blocking acceptance (`supervisor`)
//! - The single-fire shutdown gate (`shutdown`)
//! - Wiring all of the above to a transport and a backend (`bridge`)
//!
//! # What does NOT belong here?
//!
//! - Listening sockets, WebSocket framing, channel routing (infrastructure)
//! - Backend routing or authorization rules (the `Backend` implementation)

pub mod bridge;
pub mod handshake;
pub mod request_handler;
pub mod shutdown;
pub mod supervisor;

pub use bridge::Bridge;
pub use handshake::{run_handshake, CloseReason, HandshakeOutcome};
pub use request_handler::{install_request_handler, RequestHandler};
pub use shutdown::{shutdown_channel, ShutdownListener, ShutdownSignal};
pub use supervisor::{AdmissionQueue, AdmissionSupervisor};
