//! In-process transport.
//!
//! [`MemoryTransport`] hands out socket pairs without any networking: the
//! bridge side sees a [`MemorySocket`], the test side drives it through a
//! [`MemoryClient`].  Channel delivery, read timeouts, and close behave like
//! the WebSocket transport, and every socket records how often it was written
//! to and closed so tests can assert on side effects.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::time::Duration;
//! # use sockrpc_bridge::infrastructure::MemoryTransport;
//! # async fn example() -> Result<(), sockrpc_core::TransportError> {
//! let transport = MemoryTransport::new();
//! let mut client = transport.connect("127.0.0.1:50000")?;
//! client.send(r#"{"authorization":"Bearer t"}"#)?;
//! let reply = client
//!     .request("m", r#"{"method":"GET","path":"/ping"}"#)
//!     .await?;
//! # let _ = (reply, client.recv(Duration::from_millis(10)).await);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use sockrpc_core::{
    Channel, ChannelReply, NewSocketHandler, Socket, Transport, TransportError,
};

use crate::infrastructure::channel::{CloseFlag, SerialChannel};

type SharedSocketHandler = Arc<dyn Fn(Arc<dyn Socket>) + Send + Sync>;

// ── Transport ─────────────────────────────────────────────────────────────────

/// A transport whose sockets are created on demand by [`MemoryTransport::connect`].
#[derive(Default)]
pub struct MemoryTransport {
    handler: Mutex<Option<SharedSocketHandler>>,
    released: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new socket as if a client at `remote_addr` had connected.
    ///
    /// The registered new-socket callback runs before this returns.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once the transport has been released.
    pub fn connect(&self, remote_addr: impl Into<String>) -> Result<MemoryClient, TransportError> {
        if self.is_released() {
            return Err(TransportError::Closed);
        }

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let socket = Arc::new(MemorySocket {
            id: Uuid::new_v4().to_string(),
            remote_addr: remote_addr.into(),
            inbox: tokio::sync::Mutex::new(inbox_rx),
            outbox: outbox_tx,
            channels: Mutex::new(HashMap::new()),
            closed: CloseFlag::new(),
            writes: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        });
        debug!("memory socket {} opened for {}", socket.id, socket.remote_addr);

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(Arc::clone(&socket) as Arc<dyn Socket>),
            None => debug!("memory socket {}: no new-socket handler registered", socket.id),
        }

        Ok(MemoryClient {
            socket,
            inbox: inbox_tx,
            outbox: outbox_rx,
            next_message_id: AtomicU64::new(1),
        })
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn on_new_socket(&self, handler: NewSocketHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(handler));
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            debug!("memory transport released");
        }
    }
}

// ── Socket (bridge side) ──────────────────────────────────────────────────────

/// The bridge-facing end of an in-memory connection.
pub struct MemorySocket {
    id: String,
    remote_addr: String,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    outbox: mpsc::UnboundedSender<String>,
    channels: Mutex<HashMap<String, Arc<SerialChannel>>>,
    closed: CloseFlag,
    writes: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MemorySocket {
    /// Number of successful socket-level writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of times `close` was called, including repeated calls.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    /// How many handlers were registered on channel `name`.
    pub fn handler_installs(&self, name: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |channel| channel.handler_installs())
    }

    fn serial_channel(&self, name: &str) -> Arc<SerialChannel> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            channels
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(SerialChannel::new(name))),
        )
    }
}

#[async_trait]
impl Socket for MemorySocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }

    async fn read(&self, timeout: Duration) -> Result<String, TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }

        let next = async {
            let mut inbox = self.inbox.lock().await;
            tokio::select! {
                _ = self.closed.closed() => Err(TransportError::Closed),
                message = inbox.recv() => message.ok_or(TransportError::Closed),
            }
        };

        tokio::time::timeout(timeout, next)
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout)))
    }

    async fn write(&self, message: String) -> Result<(), TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbox
            .send(message)
            .map_err(|_| TransportError::Closed)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn channel(&self, name: &str) -> Arc<dyn Channel> {
        self.serial_channel(name)
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.close() {
            debug!("memory socket {} closed", self.id);
        }
    }
}

// ── Client (test side) ────────────────────────────────────────────────────────

/// The peer end of an in-memory connection.
pub struct MemoryClient {
    socket: Arc<MemorySocket>,
    inbox: mpsc::UnboundedSender<String>,
    outbox: mpsc::UnboundedReceiver<String>,
    next_message_id: AtomicU64,
}

impl MemoryClient {
    /// The bridge-facing socket, for inspecting recorded side effects.
    pub fn socket(&self) -> Arc<MemorySocket> {
        Arc::clone(&self.socket)
    }

    /// Sends one socket-level message.
    pub fn send(&self, message: impl Into<String>) -> Result<(), TransportError> {
        if self.socket.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inbox
            .send(message.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Sends a message on `channel` and waits for its reply.
    ///
    /// The call waits for as long as no handler is registered on the channel;
    /// wrap it in a timeout when that is a possibility.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if the socket is or becomes closed first, or
    /// if the channel refuses the message because its backlog is full.
    pub async fn request(
        &self,
        channel: &str,
        data: impl Into<String>,
    ) -> Result<ChannelReply, TransportError> {
        if self.socket.is_closed() {
            return Err(TransportError::Closed);
        }

        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.socket.serial_channel(channel).deliver(
            message_id.to_string(),
            data.into(),
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );

        tokio::select! {
            _ = self.socket.closed.closed() => Err(TransportError::Closed),
            reply = rx => reply.map_err(|_| TransportError::Closed),
        }
    }

    /// Receives the next socket-level message written by the bridge.
    pub async fn recv(&mut self, timeout: Duration) -> Result<String, TransportError> {
        match tokio::time::timeout(timeout, self.outbox.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    /// Closes the connection from the client side.
    pub fn close(&self) {
        self.socket.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use sockrpc_core::ChannelHandler;

    use crate::infrastructure::channel::MAX_PENDING_MESSAGES;

    struct Upper;

    #[async_trait]
    impl ChannelHandler for Upper {
        async fn on_read(&self, _message_id: &str, data: String) -> ChannelReply {
            ChannelReply::ok(data.to_uppercase())
        }
    }

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_connect_invokes_new_socket_handler() {
        // Arrange
        let transport = MemoryTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.on_new_socket(Box::new(move |socket| {
            sink.lock().unwrap().push(socket.remote_addr());
        }));

        // Act
        let _client = transport.connect("10.0.0.1:1000").unwrap();

        // Assert
        assert_eq!(*seen.lock().unwrap(), vec!["10.0.0.1:1000".to_string()]);
    }

    #[test]
    fn test_connect_after_release_fails() {
        let transport = MemoryTransport::new();
        transport.release();
        transport.release();

        assert!(transport.is_released());
        assert_eq!(
            transport.connect("10.0.0.1:1000").err(),
            Some(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_read_returns_client_message() {
        let transport = MemoryTransport::new();
        let client = transport.connect("a").unwrap();
        client.send("hello").unwrap();

        let message = client.socket().read(SHORT).await;

        assert_eq!(message, Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn test_read_times_out_when_client_is_silent() {
        let transport = MemoryTransport::new();
        let client = transport.connect("a").unwrap();

        let message = client.socket().read(SHORT).await;

        assert_eq!(message, Err(TransportError::Timeout(SHORT)));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_read_and_blocks_writes() {
        let transport = MemoryTransport::new();
        let client = transport.connect("a").unwrap();
        let socket = client.socket();

        let reader = {
            let socket = Arc::clone(&socket);
            tokio::spawn(async move { socket.read(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        socket.close();
        socket.close();

        assert_eq!(reader.await.unwrap(), Err(TransportError::Closed));
        assert_eq!(socket.write("late".to_string()).await, Err(TransportError::Closed));
        assert_eq!(socket.close_count(), 2);
        assert_eq!(client.send("late"), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_writes_reach_client_and_are_counted() {
        let transport = MemoryTransport::new();
        let mut client = transport.connect("a").unwrap();
        let socket = client.socket();

        socket.write("one".to_string()).await.unwrap();

        assert_eq!(client.recv(SHORT).await, Ok("one".to_string()));
        assert_eq!(socket.write_count(), 1);
        assert_eq!(client.recv(SHORT).await, Err(TransportError::Timeout(SHORT)));
    }

    #[tokio::test]
    async fn test_channel_request_gets_handler_reply() {
        let transport = MemoryTransport::new();
        let client = transport.connect("a").unwrap();
        let socket = client.socket();
        socket.channel("m").on_read(Arc::new(Upper));

        let reply = client.request("m", "ping").await.unwrap();

        assert_eq!(reply, ChannelReply::ok("PING"));
        assert_eq!(socket.handler_installs("m"), 1);
        assert_eq!(socket.handler_installs("other"), 0);
    }

    #[tokio::test]
    async fn test_request_refused_by_full_backlog_is_closed() {
        // Arrange: fill the backlog of a channel nobody reads.
        let transport = MemoryTransport::new();
        let client = transport.connect("a").unwrap();
        let channel = client.socket().serial_channel("m");
        for i in 0..MAX_PENDING_MESSAGES {
            assert!(channel.deliver(i.to_string(), "x".to_string(), Box::new(|_| {})));
        }

        // Act
        let reply = tokio::time::timeout(Duration::from_secs(1), client.request("m", "late"))
            .await
            .expect("a refused request must not wait");

        // Assert
        assert_eq!(reply, Err(TransportError::Closed));
        assert!(!client.socket().is_closed());
    }

    #[tokio::test]
    async fn test_request_without_handler_ends_when_socket_closes() {
        let transport = MemoryTransport::new();
        let client = transport.connect("a").unwrap();
        let socket = client.socket();

        let pending = tokio::spawn(async move { client.request("m", "x").await });
        tokio::task::yield_now().await;
        socket.close();

        assert_eq!(pending.await.unwrap(), Err(TransportError::Closed));
    }
}
