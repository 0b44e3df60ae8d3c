//! Building blocks shared by the transports.
//!
//! - [`SerialChannel`] implements the per-channel delivery contract of
//!   `sockrpc_core::transport`: messages are queued as they arrive and handed
//!   to the registered handler one at a time, each reply being sent before
//!   the next message is delivered.
//! - [`CloseFlag`] is a one-way "closed" flag that async readers can wait on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use sockrpc_core::{Channel, ChannelHandler, ChannelReply};

/// Most messages a channel holds while no handler is registered.
pub const MAX_PENDING_MESSAGES: usize = 64;

/// Receives the reply to one delivered message.
pub type ReplySink = Box<dyn FnOnce(ChannelReply) + Send>;

struct Delivery {
    message_id: String,
    data: String,
    reply: ReplySink,
}

type HandlerSlot = Arc<Mutex<Option<Arc<dyn ChannelHandler>>>>;

/// A channel that delivers its messages sequentially to one handler.
///
/// Messages delivered before a handler is registered wait in the queue, up to
/// [`MAX_PENDING_MESSAGES`]; further ones are refused.  The dispatcher task
/// starts with the first registration and stops when the channel is dropped.
pub struct SerialChannel {
    name: String,
    queue_tx: mpsc::UnboundedSender<Delivery>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    handler: HandlerSlot,
    installs: AtomicUsize,
    backlog: AtomicUsize,
}

impl SerialChannel {
    pub fn new(name: impl Into<String>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            handler: Arc::new(Mutex::new(None)),
            installs: AtomicUsize::new(0),
            backlog: AtomicUsize::new(0),
        }
    }

    /// Queues one inbound message; `reply` is called with the handler's answer.
    ///
    /// Returns `false` if the message was refused because no handler is
    /// registered yet and the backlog is full.
    pub fn deliver(&self, message_id: impl Into<String>, data: String, reply: ReplySink) -> bool {
        if self.installs.load(Ordering::SeqCst) == 0
            && self.backlog.fetch_add(1, Ordering::SeqCst) >= MAX_PENDING_MESSAGES
        {
            self.backlog.fetch_sub(1, Ordering::SeqCst);
            debug!("channel {}: no handler and backlog full; message refused", self.name);
            return false;
        }

        let delivery = Delivery {
            message_id: message_id.into(),
            data,
            reply,
        };
        if self.queue_tx.send(delivery).is_err() {
            debug!("channel {}: dispatcher gone; message dropped", self.name);
        }
        true
    }

    /// How many times a handler has been registered.
    pub fn handler_installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

impl Channel for SerialChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_read(&self, handler: Arc<dyn ChannelHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        self.installs.fetch_add(1, Ordering::SeqCst);

        let queue = self
            .queue_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(queue) = queue {
            tokio::spawn(dispatch(self.name.clone(), queue, Arc::clone(&self.handler)));
        }
    }
}

async fn dispatch(name: String, mut queue: mpsc::UnboundedReceiver<Delivery>, slot: HandlerSlot) {
    while let Some(delivery) = queue.recv().await {
        let handler = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(handler) = handler else {
            continue;
        };
        let reply = handler.on_read(&delivery.message_id, delivery.data).await;
        (delivery.reply)(reply);
    }
    debug!("channel {name}: dispatcher stopped");
}

/// A one-way closed flag.
#[derive(Debug)]
pub struct CloseFlag {
    tx: watch::Sender<bool>,
}

impl CloseFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Marks the flag closed.  Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once the flag is closed.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseFlag {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
