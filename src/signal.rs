//! The Reactor's signal channel: the single entry point for anything a
//! thread other than the Reactor needs to tell it, paired with a
//! `mio::Waker` so the Reactor's readiness wait notices without polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use mio::Waker;

/// A message queued to the Reactor from any producer thread.
#[derive(Debug)]
pub enum ControlSignal<S> {
    /// Register a freshly accepted socket.
    Register(S),
    /// Begin the drain-and-shutdown sequence with the given aggregate
    /// timeout. `Duration::ZERO` means "skip the drain, kill immediately".
    Shutdown(Duration),
}

/// Producer-side handle for posting control signals to the Reactor.
///
/// Cloneable and thread-safe; the Acceptor holds one to register new
/// connections, and the `Server`'s shutdown path holds one to trigger the
/// drain sequence.
pub struct SignalSender<S> {
    tx: Sender<ControlSignal<S>>,
    waker: Arc<Waker>,
    closed: Arc<AtomicBool>,
}

// `Debug`/`Clone` are written by hand rather than derived: deriving either
// would add a spurious `S: Debug`/`S: Clone` bound even though `S` (the
// socket type) never needs either — only the channel handle and the flag
// do.
impl<S> std::fmt::Debug for SignalSender<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSender").finish_non_exhaustive()
    }
}

impl<S> Clone for SignalSender<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            waker: self.waker.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<S> SignalSender<S> {
    pub(crate) fn new(tx: Sender<ControlSignal<S>>, waker: Arc<Waker>, closed: Arc<AtomicBool>) -> Self {
        Self { tx, waker, closed }
    }

    /// Registers a new connection with the Reactor. A no-op once the
    /// Reactor has begun shutting down: rather than racing a send against a
    /// torn-down channel, the connection (and its socket) is simply dropped.
    pub fn add_connection(&self, stream: S) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if self.tx.send(ControlSignal::Register(stream)).is_err() {
            return false;
        }
        self.waker.wake().is_ok()
    }

    /// Posts the shutdown signal and wakes the Reactor. Idempotence is the
    /// caller's responsibility (the Acceptor guards this with a mutex).
    pub fn shutdown(&self, timeout: Duration) {
        self.closed.store(true, Ordering::Release);
        let _ = self.tx.send(ControlSignal::Shutdown(timeout));
        let _ = self.waker.wake();
    }
}

/// Builds a connected signal sender/receiver pair, backed by the given
/// `Waker` (already registered at the Reactor's wakeup token).
pub fn channel<S>(waker: Arc<Waker>) -> (SignalSender<S>, Receiver<ControlSignal<S>>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (SignalSender::new(tx, waker, Arc::new(AtomicBool::new(false))), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Poll, Token};

    #[test]
    fn add_connection_after_shutdown_is_refused() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        let (sender, rx) = channel::<u32>(waker);

        sender.shutdown(Duration::ZERO);
        assert!(!sender.add_connection(42));

        // only the shutdown signal should have been queued
        let mut signals = Vec::new();
        while let Ok(sig) = rx.try_recv() {
            signals.push(sig);
        }
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0], ControlSignal::Shutdown(_)));
    }
}
