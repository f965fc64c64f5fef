//! Session-wide cancellation.
//!
//! A [`ShutdownTrigger`] owns the only sender of a zero-capacity crossbeam
//! channel. Triggering drops that sender, which disconnects every
//! [`ShutdownSignal`] clone at once. Workers put `signal.receiver()` into
//! their `select!` next to whatever they block on, so a blocking wait is
//! interrupted the moment the session closes.

use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

/// Owner side. Dropping it also fires the signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: Mutex<Option<Sender<()>>>,
}

/// Observer side, cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

/// Create a linked trigger/signal pair.
pub fn shutdown_pair() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = bounded(0);
    (
        ShutdownTrigger {
            tx: Mutex::new(Some(tx)),
        },
        ShutdownSignal { rx },
    )
}

impl ShutdownTrigger {
    /// Fire the signal. Returns `false` if it had already fired.
    pub fn trigger(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl ShutdownSignal {
    /// Returns true once the trigger has fired.
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep until `deadline`. Returns `true` if shutdown fired first.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        match self.rx.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => false,
            // Nothing is ever sent, so Ok is unreachable in practice.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Channel to `select!` on. Becomes ready (disconnected) on shutdown.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
