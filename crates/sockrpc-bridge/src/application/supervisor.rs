//! Admission supervisor: decouples socket acceptance from handshake work.
//!
//! The transport reports accepted sockets through a callback that must never
//! block.  The callback pushes each socket into an unbounded
//! [`AdmissionQueue`]; a single dispatch loop ([`AdmissionSupervisor::run`])
//! drains the queue and spawns one Tokio task per socket to run the
//! handshake.  The loop never waits for a handshake to finish, so a client
//! that connects and then stays silent cannot delay anybody else.
//!
//! ```text
//! transport accept ──enqueue──▶ [unbounded queue] ──▶ dispatch loop ──spawn──▶ handshake task
//!                                                          ▲                 ──spawn──▶ handshake task
//!                                       shutdown signal ───┘                 ──spawn──▶ ...
//! ```
//!
//! # Shutdown
//!
//! The loop exits when the shutdown signal fires or when every queue handle
//! has been dropped.  Handshake tasks that are already running are neither
//! joined nor cancelled: each one is bounded by the connection-message
//! timeout and ends on its own.  On shutdown the queue is closed and every
//! socket still waiting in it is closed without a handshake; later
//! [`AdmissionQueue::enqueue`] calls close their socket straight away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sockrpc_core::{Backend, Socket};

use crate::application::handshake::run_handshake;
use crate::application::shutdown::ShutdownListener;

/// Producer handle of the hand-off queue.  Cheap to clone.
#[derive(Clone)]
pub struct AdmissionQueue {
    tx: mpsc::UnboundedSender<Arc<dyn Socket>>,
}

impl AdmissionQueue {
    /// Hands `socket` to the dispatch loop without blocking.
    ///
    /// Returns `false` if the dispatch loop has already stopped; the socket is
    /// then closed, since nobody will ever run its handshake.
    pub fn enqueue(&self, socket: Arc<dyn Socket>) -> bool {
        match self.tx.send(socket) {
            Ok(()) => true,
            Err(mpsc::error::SendError(socket)) => {
                warn!(
                    "socket {}: admission stopped; closing",
                    socket.remote_addr()
                );
                socket.close();
                false
            }
        }
    }
}

/// Owns the consumer side of the hand-off queue and the dispatch loop.
pub struct AdmissionSupervisor {
    backend: Arc<dyn Backend>,
    connection_message_timeout: Duration,
    queue: mpsc::UnboundedReceiver<Arc<dyn Socket>>,
    shutdown: ShutdownListener,
}

impl AdmissionSupervisor {
    /// Creates a supervisor and the queue handle the transport feeds.
    pub fn new(
        backend: Arc<dyn Backend>,
        connection_message_timeout: Duration,
        shutdown: ShutdownListener,
    ) -> (Self, AdmissionQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            backend,
            connection_message_timeout,
            queue: rx,
            shutdown,
        };
        (supervisor, AdmissionQueue { tx })
    }

    /// Runs the dispatch loop until shutdown.
    ///
    /// Returns the number of handshakes dispatched.
    pub async fn run(mut self) -> usize {
        let mut dispatched = 0usize;

        loop {
            tokio::select! {
                // Check shutdown first so a busy queue cannot starve it.
                biased;

                _ = self.shutdown.triggered() => {
                    info!("shutdown signalled; admission loop stopping after {dispatched} handshakes");
                    self.close_waiting();
                    break;
                }

                next = self.queue.recv() => match next {
                    Some(socket) => {
                        dispatched += 1;
                        self.dispatch(socket);
                    }
                    None => {
                        debug!("admission queue closed; admission loop stopping");
                        break;
                    }
                },
            }
        }

        dispatched
    }

    /// Closes the queue and every socket still waiting in it.
    fn close_waiting(&mut self) {
        self.queue.close();
        let mut closed = 0usize;
        while let Ok(socket) = self.queue.try_recv() {
            debug!("socket {}: admission stopped before handshake; closing", socket.remote_addr());
            socket.close();
            closed += 1;
        }
        if closed > 0 {
            info!("closed {closed} sockets still waiting for admission");
        }
    }

    /// Spawns the handshake task for one socket and returns immediately.
    fn dispatch(&self, socket: Arc<dyn Socket>) {
        let backend = Arc::clone(&self.backend);
        let timeout = self.connection_message_timeout;
        debug!("socket {}: handshake dispatched", socket.remote_addr());

        tokio::spawn(async move {
            let remote_addr = socket.remote_addr();
            let outcome = run_handshake(socket, backend.as_ref(), timeout).await;
            debug!("socket {remote_addr}: handshake finished: {outcome:?}");
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
