//! Connection handshake for newly accepted sockets.
//!
//! Every socket must authorize itself before it may send requests.  The first
//! socket-level message is the *connection message*: a flat JSON object of
//! header values.  The handshake turns it into a [`ConnectionRequest`] and asks
//! the backend for an admission decision.
//!
//! # State machine
//!
//! ```text
//! Awaiting-Message ──read(timeout)──▶ Decoding ──decode_headers──▶ Authorizing
//!        │                               │                           │
//!        │ Closed        → Abandoned     │ malformed → close         ├─ Rejected → write response
//!        │ Timeout / Io  → close         │                           └─ Admitted → install handler
//! ```
//!
//! A rejected socket is *not* closed: the client receives the rejection as a
//! regular message and decides what to do next.  A socket that fails to send
//! a well-formed connection message in time is closed and never reaches the
//! backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use sockrpc_core::protocol::{decode_headers, encode_response};
use sockrpc_core::{Admission, Backend, ConnectionRequest, Socket, TransportError};

use crate::application::request_handler::install_request_handler;

/// Why the handshake closed a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No connection message arrived within the timeout.
    ReadTimeout,
    /// The transport reported a read error other than a closed socket.
    ReadFailed,
    /// The connection message was not a JSON object of string values.
    MalformedHeaders,
}

/// How a handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The backend admitted the session; the request handler is installed.
    Admitted,
    /// The backend refused the session; its response was written back.
    Rejected { status: u16 },
    /// The handshake closed the socket.
    Closed(CloseReason),
    /// The socket was already closed by the transport; nothing was done.
    Abandoned,
}

/// Runs the handshake on one pending socket.
///
/// The only suspension points are the bounded read and the backend's
/// admission call, so a slow or silent client only ever holds up its own
/// task.
pub async fn run_handshake(
    socket: Arc<dyn Socket>,
    backend: &dyn Backend,
    connection_message_timeout: Duration,
) -> HandshakeOutcome {
    let remote_addr = socket.remote_addr();

    // ── Awaiting-Message ──────────────────────────────────────────────────────
    let message = match socket.read(connection_message_timeout).await {
        Ok(m) => m,
        Err(TransportError::Closed) => {
            debug!("socket {remote_addr}: closed before sending a connection message");
            return HandshakeOutcome::Abandoned;
        }
        Err(e) => {
            let reason = match e {
                TransportError::Timeout(_) => CloseReason::ReadTimeout,
                _ => CloseReason::ReadFailed,
            };
            info!("socket {remote_addr}: no connection message ({e}); closing");
            socket.close();
            return HandshakeOutcome::Closed(reason);
        }
    };

    // ── Decoding ──────────────────────────────────────────────────────────────
    let headers = match decode_headers(&message) {
        Ok(h) => h,
        Err(e) => {
            warn!("socket {remote_addr}: invalid connection message: {e}; closing");
            socket.close();
            return HandshakeOutcome::Closed(CloseReason::MalformedHeaders);
        }
    };

    // ── Authorizing ───────────────────────────────────────────────────────────
    let request = ConnectionRequest::from_headers(remote_addr.clone(), headers);
    match backend.new_connection(request).await {
        Admission::Rejected(response) => {
            let (status, payload) = response.status_and_payload();
            info!("socket {remote_addr}: connection rejected with status {status}");
            if let Err(e) = socket.write(encode_response(status, &payload)).await {
                warn!("socket {remote_addr}: failed to write rejection: {e}");
            }
            HandshakeOutcome::Rejected { status }
        }
        Admission::Admitted(connection) => {
            install_request_handler(socket.as_ref(), connection);
            info!("socket {remote_addr}: session established");
            HandshakeOutcome::Admitted
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mockall::mock;
    use sockrpc_core::{
        BackendResponse, Channel, ChannelHandler, Connection, IncomingRequest, MAIN_CHANNEL,
    };

    // ── Test doubles ──────────────────────────────────────────────────────────

    mock! {
        pub Gatekeeper {}

        #[async_trait]
        impl Backend for Gatekeeper {
            async fn new_connection(&self, request: ConnectionRequest) -> Admission;
        }
    }

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn handle(&self, _request: IncomingRequest) -> BackendResponse {
            BackendResponse::new(204, "")
        }
    }

    #[derive(Default)]
    struct CountingChannel {
        installs: AtomicUsize,
    }

    impl Channel for CountingChannel {
        fn name(&self) -> &str {
            MAIN_CHANNEL
        }

        fn on_read(&self, _handler: Arc<dyn ChannelHandler>) {
            self.installs.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A socket whose reads return scripted results and whose side effects
    /// are recorded.
    struct ScriptedSocket {
        reads: Mutex<VecDeque<Result<String, TransportError>>>,
        writes: Mutex<Vec<String>>,
        closes: AtomicUsize,
        channel_names: Mutex<Vec<String>>,
        main: Arc<CountingChannel>,
    }

    impl ScriptedSocket {
        fn reading(result: Result<String, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                reads: Mutex::new(VecDeque::from([result])),
                writes: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
                channel_names: Mutex::new(Vec::new()),
                main: Arc::new(CountingChannel::default()),
            })
        }

        fn writes(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        fn installs(&self) -> usize {
            self.main.installs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Socket for ScriptedSocket {
        fn id(&self) -> &str {
            "scripted"
        }

        fn remote_addr(&self) -> String {
            "10.1.2.3:40000".to_string()
        }

        async fn read(&self, _timeout: Duration) -> Result<String, TransportError> {
            self.reads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Closed))
        }

        async fn write(&self, message: String) -> Result<(), TransportError> {
            self.writes.lock().unwrap().push(message);
            Ok(())
        }

        fn channel(&self, name: &str) -> Arc<dyn Channel> {
            self.channel_names.lock().unwrap().push(name.to_string());
            Arc::clone(&self.main) as Arc<dyn Channel>
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn never_called_backend() -> MockGatekeeper {
        let mut backend = MockGatekeeper::new();
        backend.expect_new_connection().never();
        backend
    }

    // ── Awaiting-Message ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_timeout_closes_socket_without_admission() {
        // Arrange
        let socket = ScriptedSocket::reading(Err(TransportError::Timeout(TIMEOUT)));
        let backend = never_called_backend();

        // Act
        let outcome = run_handshake(socket.clone(), &backend, TIMEOUT).await;

        // Assert
        assert_eq!(outcome, HandshakeOutcome::Closed(CloseReason::ReadTimeout));
        assert_eq!(socket.closes(), 1);
        assert_eq!(socket.installs(), 0);
        assert!(socket.writes().is_empty());
    }

    #[tokio::test]
    async fn test_closed_socket_is_abandoned_silently() {
        let socket = ScriptedSocket::reading(Err(TransportError::Closed));
        let backend = never_called_backend();

        let outcome = run_handshake(socket.clone(), &backend, TIMEOUT).await;

        assert_eq!(outcome, HandshakeOutcome::Abandoned);
        assert_eq!(socket.closes(), 0, "an already closed socket is left alone");
    }

    #[tokio::test]
    async fn test_other_read_error_closes_socket() {
        let socket = ScriptedSocket::reading(Err(TransportError::Io("reset".to_string())));
        let backend = never_called_backend();

        let outcome = run_handshake(socket.clone(), &backend, TIMEOUT).await;

        assert_eq!(outcome, HandshakeOutcome::Closed(CloseReason::ReadFailed));
        assert_eq!(socket.closes(), 1);
    }

    // ── Decoding ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_malformed_connection_message_closes_and_stops() {
        // The backend must not see a session built from a malformed message.
        let socket = ScriptedSocket::reading(Ok("{not json".to_string()));
        let backend = never_called_backend();

        let outcome = run_handshake(socket.clone(), &backend, TIMEOUT).await;

        assert_eq!(outcome, HandshakeOutcome::Closed(CloseReason::MalformedHeaders));
        assert_eq!(socket.closes(), 1);
        assert_eq!(socket.installs(), 0);
    }

    // ── Authorizing ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_headers_are_fanned_out_to_single_element_lists() {
        // Arrange
        let socket = ScriptedSocket::reading(Ok(
            r#"{"authorization":"Bearer t","x-a":"1","x-b":""}"#.to_string(),
        ));
        let mut backend = MockGatekeeper::new();
        backend
            .expect_new_connection()
            .times(1)
            .withf(|req| {
                req.remote_addr == "10.1.2.3:40000"
                    && req.headers.len() == 3
                    && req.headers["authorization"] == vec!["Bearer t".to_string()]
                    && req.headers["x-a"] == vec!["1".to_string()]
                    && req.headers["x-b"] == vec![String::new()]
            })
            .returning(|_| Admission::Rejected(BackendResponse::new(403, "forbidden")));

        // Act
        let outcome = run_handshake(socket, &backend, TIMEOUT).await;

        // Assert (the `withf` matcher carries the real assertion)
        assert_eq!(outcome, HandshakeOutcome::Rejected { status: 403 });
    }

    #[tokio::test]
    async fn test_rejection_writes_once_and_does_not_close() {
        let socket = ScriptedSocket::reading(Ok("{}".to_string()));
        let mut backend = MockGatekeeper::new();
        backend
            .expect_new_connection()
            .times(1)
            .returning(|_| Admission::Rejected(BackendResponse::new(401, "unauthorized")));

        let outcome = run_handshake(socket.clone(), &backend, TIMEOUT).await;

        assert_eq!(outcome, HandshakeOutcome::Rejected { status: 401 });
        assert_eq!(
            socket.writes(),
            vec![r#"{"status":401,"payload":"unauthorized"}"#.to_string()]
        );
        assert_eq!(socket.closes(), 0);
        assert_eq!(socket.installs(), 0);
    }

    #[tokio::test]
    async fn test_admission_installs_handler_once_on_main_channel() {
        let socket = ScriptedSocket::reading(Ok(r#"{"authorization":"ok"}"#.to_string()));
        let mut backend = MockGatekeeper::new();
        backend
            .expect_new_connection()
            .times(1)
            .returning(|_| Admission::Admitted(Arc::new(NullConnection)));

        let outcome = run_handshake(socket.clone(), &backend, TIMEOUT).await;

        assert_eq!(outcome, HandshakeOutcome::Admitted);
        assert_eq!(socket.installs(), 1);
        assert_eq!(
            *socket.channel_names.lock().unwrap(),
            vec![MAIN_CHANNEL.to_string()]
        );
        assert!(socket.writes().is_empty());
        assert_eq!(socket.closes(), 0);
    }
}
