//! Single-fire shutdown gate.
//!
//! [`shutdown_channel`] returns a [`ShutdownSignal`] and a cloneable
//! [`ShutdownListener`].  The signal fires at most once: [`ShutdownSignal::trigger`]
//! takes `self`, so a second trigger does not compile.  Dropping the signal
//! without triggering it also releases every listener, so a lost owner can
//! never leave a loop waiting forever.

use tokio::sync::watch;

/// Creates a connected signal/listener pair.
pub fn shutdown_channel() -> (ShutdownSignal, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal { tx }, ShutdownListener { rx })
}

/// The writing half of the gate.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    /// Fires the signal, waking every listener.
    pub fn trigger(self) {
        // No listeners left is fine: nobody is waiting.
        let _ = self.tx.send(true);
    }
}

/// The observing half of the gate; clone it for each observer.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Returns `true` once the signal has fired or been dropped.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Completes once the signal has fired or been dropped.
    pub async fn triggered(&mut self) {
        // `Err` means the signal was dropped, which counts as shutdown.
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
