//! WebSocket transport: accept loop, envelope routing, and per-socket tasks.
//!
//! Each WebSocket connection carries JSON text frames ("envelopes"):
//!
//! ```text
//! {"data":"..."}                                   socket-level message
//! {"channel":"m","id":"7","data":"..."}            channel request
//! {"channel":"m","id":"7","code":0,"data":"..."}   channel reply (server → client)
//! ```
//!
//! # Tasks per socket
//!
//! - **reader**: owns the stream half; routes socket-level messages into the
//!   socket's bounded inbox and channel requests to the matching
//!   [`SerialChannel`] once the bridge has opened it.
//! - **writer**: owns the sink half; sends every outgoing frame in order.
//! - one dispatcher per channel with a registered handler (see
//!   [`SerialChannel`]).
//!
//! Upgrade requests whose path lies outside the namespace are answered with
//! HTTP 404 and never reach the new-socket callback.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sockrpc_core::{
    namespace_matches, normalize_namespace, Channel, ChannelReply, NewSocketHandler, Socket,
    Transport, TransportError,
};

use crate::infrastructure::channel::{CloseFlag, SerialChannel, MAX_PENDING_MESSAGES};

type SharedSocketHandler = Arc<dyn Fn(Arc<dyn Socket>) + Send + Sync>;
type WsStream = WebSocketStream<TcpStream>;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One JSON text frame.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u8>,
    #[serde(default)]
    pub data: String,
}

impl Envelope {
    /// A socket-level message.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// The reply to channel message `id`.
    pub fn reply(channel: impl Into<String>, id: impl Into<String>, reply: ChannelReply) -> Self {
        Self {
            channel: Some(channel.into()),
            id: Some(id.into()),
            code: Some(reply.code.as_u8()),
            data: reply.data,
        }
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// A WebSocket server that reports every upgraded connection as a [`Socket`].
pub struct WsTransport {
    namespace: String,
    handler: Mutex<Option<SharedSocketHandler>>,
    released: CloseFlag,
}

impl WsTransport {
    /// Creates a transport serving under `namespace` (normalized here).
    pub fn new(namespace: &str) -> Arc<Self> {
        Arc::new(Self {
            namespace: normalize_namespace(namespace),
            handler: Mutex::new(None),
            released: CloseFlag::new(),
        })
    }

    /// The normalized namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Runs the accept loop on `listener` until the transport is released.
    ///
    /// Each connection is upgraded in its own task, so a slow client never
    /// delays the next accept.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener
            .local_addr()
            .context("failed to read WebSocket listener address")?;
        info!(
            "WebSocket transport listening on ws://{local_addr}{}",
            self.namespace
        );

        loop {
            tokio::select! {
                _ = self.released.closed() => {
                    info!("WebSocket transport released; stopping accept loop");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!("TCP connection from {peer_addr}");
                        let transport = Arc::clone(&self);
                        tokio::spawn(async move {
                            transport.upgrade(stream, peer_addr).await;
                        });
                    }
                    Err(e) => {
                        // Transient (e.g. out of file descriptors); keep serving.
                        error!("accept error: {e}");
                    }
                },
            }
        }
    }

    async fn upgrade(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let namespace = self.namespace.clone();
        let check_path = move |request: &Request, response: Response| {
            let path = request.uri().path();
            if namespace_matches(&namespace, path) {
                Ok(response)
            } else {
                let mut rejection: ErrorResponse =
                    ErrorResponse::new(Some(format!("no socket endpoint at {path}")));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws = match accept_hdr_async(stream, check_path).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket upgrade from {peer_addr} failed: {e}");
                return;
            }
        };

        let socket = WsSocket::start(ws, peer_addr);
        if self.released.is_closed() {
            debug!("socket {}: transport released during upgrade", socket.id);
            socket.close();
            return;
        }

        info!("socket {} connected from {peer_addr}", socket.id);
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(socket as Arc<dyn Socket>),
            None => {
                warn!("socket {}: no new-socket handler registered; closing", socket.id);
                socket.close();
            }
        }
    }
}

impl Transport for WsTransport {
    fn on_new_socket(&self, handler: NewSocketHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(handler));
    }

    fn release(&self) {
        if self.released.close() {
            self.handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }
}

// ── Socket ────────────────────────────────────────────────────────────────────

/// Most socket-level messages held for [`Socket::read`]; later ones are dropped.
pub const INBOX_CAPACITY: usize = 8;

/// A channel request that arrived before its channel was opened.
struct PendingFrame {
    channel: String,
    id: String,
    data: String,
}

/// One upgraded WebSocket connection.
///
/// Channels exist only once the bridge opens them through
/// [`Socket::channel`].  Requests for a channel that is not open yet are held
/// in a buffer of at most [`MAX_PENDING_MESSAGES`] frames and handed over when
/// the channel opens; a peer that overflows the buffer is disconnected.
pub struct WsSocket {
    id: String,
    remote_addr: String,
    inbox: tokio::sync::Mutex<mpsc::Receiver<String>>,
    frames: mpsc::UnboundedSender<WsMessage>,
    channels: Mutex<HashMap<String, Arc<SerialChannel>>>,
    pending: Mutex<Vec<PendingFrame>>,
    closed: CloseFlag,
}

impl WsSocket {
    /// Splits `ws` and spawns the reader and writer tasks.
    fn start(ws: WsStream, peer_addr: SocketAddr) -> Arc<Self> {
        let (sink, stream) = ws.split();
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let socket = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            remote_addr: peer_addr.to_string(),
            inbox: tokio::sync::Mutex::new(inbox_rx),
            frames: frames_tx,
            channels: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            closed: CloseFlag::new(),
        });

        tokio::spawn(write_loop(socket.id.clone(), sink, frames_rx));
        tokio::spawn(read_loop(Arc::clone(&socket), stream, inbox_tx));
        socket
    }

    /// Returns channel `name`, opening it and flushing its held frames on
    /// first use.
    fn open_channel(&self, name: &str) -> Arc<SerialChannel> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = channels.get(name) {
            return Arc::clone(channel);
        }

        let channel = Arc::new(SerialChannel::new(name));
        channels.insert(name.to_string(), Arc::clone(&channel));

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (held, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
            .into_iter()
            .partition(|frame| frame.channel == name);
        *pending = rest;
        for frame in held {
            self.deliver(&channel, frame);
        }
        channel
    }

    /// Queues `frame` on `channel` with a reply sink that writes the reply
    /// envelope back to the peer.
    fn deliver(&self, channel: &SerialChannel, frame: PendingFrame) -> bool {
        let frames = self.frames.clone();
        let socket_id = self.id.clone();
        let PendingFrame { channel: name, id, data } = frame;
        let reply_id = id.clone();
        channel.deliver(
            id,
            data,
            Box::new(move |reply| {
                let envelope = Envelope::reply(name, reply_id, reply);
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if frames.send(WsMessage::Text(json)).is_err() {
                            debug!("socket {socket_id}: reply dropped; writer gone");
                        }
                    }
                    Err(e) => error!("socket {socket_id}: failed to encode reply: {e}"),
                }
            }),
        )
    }

    /// Routes one inbound text frame.
    fn route(&self, text: &str, inbox: &mpsc::Sender<String>) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("socket {}: dropping unreadable frame: {e}", self.id);
                return;
            }
        };

        let Some(channel) = envelope.channel else {
            if let Err(mpsc::error::TrySendError::Full(_)) = inbox.try_send(envelope.data) {
                warn!("socket {}: nobody is reading; message dropped", self.id);
            }
            return;
        };

        let frame = PendingFrame {
            channel,
            id: envelope.id.unwrap_or_default(),
            data: envelope.data,
        };

        let accepted = {
            let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            match channels.get(&frame.channel) {
                Some(open) => self.deliver(open, frame),
                None => {
                    let mut pending =
                        self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                    if pending.len() < MAX_PENDING_MESSAGES {
                        pending.push(frame);
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if !accepted {
            warn!(
                "socket {}: too many requests for channels without a handler; closing",
                self.id
            );
            self.close();
        }
    }
}

#[async_trait]
impl Socket for WsSocket {
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
        let json = serde_json::to_string(&Envelope::message(message))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.frames
            .send(WsMessage::Text(json))
            .map_err(|_| TransportError::Closed)
    }

    fn channel(&self, name: &str) -> Arc<dyn Channel> {
        self.open_channel(name)
    }

    fn close(&self) {
        if self.closed.close() {
            debug!("socket {}: closing", self.id);
            let _ = self.frames.send(WsMessage::Close(None));
        }
    }
}

// ── Socket tasks ──────────────────────────────────────────────────────────────

async fn read_loop(
    socket: Arc<WsSocket>,
    mut stream: SplitStream<WsStream>,
    inbox: mpsc::Sender<String>,
) {
    loop {
        let frame = tokio::select! {
            _ = socket.closed.closed() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => socket.route(&text, &inbox),
            Some(Ok(WsMessage::Close(_))) | None => {
                debug!("socket {}: closed by peer", socket.id);
                break;
            }
            // Ping/pong are answered by tungstenite; binary frames are not part
            // of the protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("socket {}: read error: {e}", socket.id);
                break;
            }
        }
    }

    socket.close();
    info!("socket {} disconnected", socket.id);
}

async fn write_loop(
    socket_id: String,
    mut sink: SplitSink<WsStream, WsMessage>,
    mut frames: mpsc::UnboundedReceiver<WsMessage>,
) {
    while let Some(frame) = frames.recv().await {
        let is_close = matches!(frame, WsMessage::Close(_));
        if let Err(e) = sink.send(frame).await {
            debug!("socket {socket_id}: write error: {e}");
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use sockrpc_core::{ChannelHandler, ReplyCode};
    use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const WAIT: Duration = Duration::from_secs(5);

    // ── Test helpers ──────────────────────────────────────────────────────────

    /// Upgrades one loopback connection and returns both ends.
    async fn socket_pair() -> (Arc<WsSocket>, Client) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let (client, _response) = connect_async(format!("ws://{addr}/")).await.unwrap();
            client
        });

        let (stream, peer_addr) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let socket = WsSocket::start(ws, peer_addr);
        (socket, client.await.unwrap())
    }

    async fn send(client: &mut Client, envelope: serde_json::Value) {
        client
            .send(WsMessage::Text(envelope.to_string()))
            .await
            .unwrap();
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn pending_frames(socket: &WsSocket) -> usize {
        socket.pending.lock().unwrap().len()
    }

    fn open_channels(socket: &WsSocket) -> usize {
        socket.channels.lock().unwrap().len()
    }

    struct Upper;

    #[async_trait]
    impl ChannelHandler for Upper {
        async fn on_read(&self, _message_id: &str, data: String) -> ChannelReply {
            ChannelReply::ok(data.to_uppercase())
        }
    }

    // ── Inbound flow control ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_channels_are_never_allocated() {
        // Arrange
        let (socket, mut client) = socket_pair().await;

        // Act: fill the pending buffer, one distinct channel name per frame.
        for i in 0..MAX_PENDING_MESSAGES {
            send(
                &mut client,
                serde_json::json!({"channel": format!("c{i}"), "id": "1", "data": "x"}),
            )
            .await;
        }
        wait_until("held frames", || pending_frames(&socket) == MAX_PENDING_MESSAGES).await;

        // Assert: nothing was allocated and the peer is still connected.
        assert_eq!(open_channels(&socket), 0);
        assert!(!socket.closed.is_closed());

        // Act: one frame past the limit.
        send(
            &mut client,
            serde_json::json!({"channel": "overflow", "id": "1", "data": "x"}),
        )
        .await;

        // Assert
        wait_until("disconnect", || socket.closed.is_closed()).await;
        assert_eq!(open_channels(&socket), 0);
        assert_eq!(pending_frames(&socket), MAX_PENDING_MESSAGES);
    }

    #[tokio::test]
    async fn test_frames_held_before_channel_opens_reach_handler() {
        // Arrange
        let (socket, mut client) = socket_pair().await;
        send(
            &mut client,
            serde_json::json!({"channel": "m", "id": "1", "data": "early"}),
        )
        .await;
        wait_until("held frame", || pending_frames(&socket) == 1).await;

        // Act
        socket.channel("m").on_read(Arc::new(Upper));

        // Assert
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("reply must arrive")
            .unwrap()
            .unwrap();
        let WsMessage::Text(text) = frame else {
            panic!("expected a text frame, got {frame:?}");
        };
        let reply: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(reply, Envelope::reply("m", "1", ChannelReply::ok("EARLY")));
        assert_eq!(pending_frames(&socket), 0);
    }

    #[tokio::test]
    async fn test_unread_socket_messages_are_bounded() {
        // Arrange
        let (socket, mut client) = socket_pair().await;

        // Act: far more socket-level messages than anyone reads, then one
        // channel frame to know when the reader has routed them all.
        for i in 0..INBOX_CAPACITY * 4 {
            send(&mut client, serde_json::json!({"data": i.to_string()})).await;
        }
        send(
            &mut client,
            serde_json::json!({"channel": "m", "id": "1", "data": "marker"}),
        )
        .await;
        wait_until("marker frame", || pending_frames(&socket) == 1).await;

        // Assert: only the first INBOX_CAPACITY messages were kept.
        for i in 0..INBOX_CAPACITY {
            let message = socket.read(Duration::from_millis(100)).await;
            assert_eq!(message, Ok(i.to_string()));
        }
        let short = Duration::from_millis(50);
        assert_eq!(socket.read(short).await, Err(TransportError::Timeout(short)));
        assert!(!socket.closed.is_closed());
    }

    #[test]
    fn test_socket_message_envelope_has_only_data() {
        let json = serde_json::to_string(&Envelope::message("hi")).unwrap();
        assert_eq!(json, r#"{"data":"hi"}"#);
    }

    #[test]
    fn test_reply_envelope_carries_channel_id_and_code() {
        let envelope = Envelope::reply("m", "7", ChannelReply::invalid_payload());

        let json = serde_json::to_string(&envelope).unwrap();

        assert_eq!(
            json,
            r#"{"channel":"m","id":"7","code":1,"data":"invalid payload"}"#
        );
    }

    #[test]
    fn test_request_envelope_parses_without_code() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"channel":"m","id":"3","data":"x"}"#).unwrap();

        assert_eq!(envelope.channel.as_deref(), Some("m"));
        assert_eq!(envelope.id.as_deref(), Some("3"));
        assert_eq!(envelope.code, None);
        assert_eq!(envelope.data, "x");
    }

    #[test]
    fn test_ok_reply_code_is_zero() {
        let envelope = Envelope::reply("m", "1", ChannelReply::ok("{}"));
        assert_eq!(envelope.code, Some(ReplyCode::Ok.as_u8()));
        assert_eq!(envelope.code, Some(0));
    }

    #[test]
    fn test_new_transport_normalizes_namespace() {
        let transport = WsTransport::new("api//socket/");
        assert_eq!(transport.namespace(), "/api/socket");
    }
}
