//! The bridge: wires a transport, a backend, and the admission supervisor.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use sockrpc_bridge::{Bridge, BridgeConfig};
//! # use sockrpc_bridge::infrastructure::{EchoBackend, MemoryTransport};
//! # async fn example() {
//! let transport = Arc::new(MemoryTransport::new());
//! let backend = Arc::new(EchoBackend::new(None));
//! let bridge = Bridge::new(transport, backend, &BridgeConfig::default());
//! // ... serve traffic ...
//! bridge.release().await;
//! # }
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use sockrpc_core::{Backend, Transport};

use crate::application::shutdown::{shutdown_channel, ShutdownSignal};
use crate::application::supervisor::AdmissionSupervisor;
use crate::domain::config::BridgeConfig;

/// A running bridge between one transport and one backend.
pub struct Bridge {
    transport: Arc<dyn Transport>,
    shutdown: ShutdownSignal,
    dispatch_loop: JoinHandle<usize>,
}

impl Bridge {
    /// Registers the bridge with `transport` and starts the dispatch loop.
    ///
    /// Must be called from within a Tokio runtime.  Only
    /// `config.connection_message_timeout` is used here; the other settings
    /// belong to the transport and backend.
    pub fn new(
        transport: Arc<dyn Transport>,
        backend: Arc<dyn Backend>,
        config: &BridgeConfig,
    ) -> Self {
        let (shutdown, listener) = shutdown_channel();
        let (supervisor, queue) =
            AdmissionSupervisor::new(backend, config.connection_message_timeout, listener);

        transport.on_new_socket(Box::new(move |socket| {
            queue.enqueue(socket);
        }));

        let dispatch_loop = tokio::spawn(supervisor.run());
        info!(
            "bridge started (connection message timeout {:?})",
            config.connection_message_timeout
        );

        Self {
            transport,
            shutdown,
            dispatch_loop,
        }
    }

    /// Stops admitting sockets and releases the transport.
    ///
    /// Consumes the bridge, so it can only be released once.  Waits for the
    /// dispatch loop to exit; handshakes already in flight and established
    /// sessions are not waited for.
    pub async fn release(self) {
        self.shutdown.trigger();
        self.transport.release();

        match self.dispatch_loop.await {
            Ok(dispatched) => info!("bridge released after {dispatched} handshakes"),
            Err(e) => warn!("admission loop ended abnormally: {e}"),
        }
    }
}
