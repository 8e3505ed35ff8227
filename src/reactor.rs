//! The Reactor: the single thread that owns the live connection set, reads
//! available bytes without blocking the Acceptor's accept loop, and hands
//! complete frames to the worker pool.
//!
//! Built around `mio::Poll` + `mio::Events`, a reserved wakeup token, and a
//! `slab::Slab` of connections keyed by `mio::Token`.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, info, warn};

use crate::connection::{Connection, FillOutcome};
use crate::net::tcp_stream::TcpStream;
use crate::processor::{Processor, ProtocolFactory, TransportFactory};
use crate::signal::{channel, ControlSignal, SignalSender};
use crate::worker::{WorkItem, WorkerPool};

/// Reserved token the Reactor's wakeup `Waker` is registered under. Chosen
/// from the top of the token space so it never collides with a slab key.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Handle returned by [`Reactor::spawn`]: lets the Acceptor register new
/// connections and trigger shutdown without touching the Reactor's thread
/// directly.
pub struct ReactorHandle<S> {
    signals: SignalSender<S>,
    ack_rx: Receiver<()>,
    thread: Option<std::thread::JoinHandle<()>>,
    started_shutdown: Arc<AtomicBool>,
}

// Written by hand: deriving would add a spurious `S: Debug` bound (`S` only
// appears nested inside `SignalSender<S>`, which doesn't need it).
impl<S> std::fmt::Debug for ReactorHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle").finish_non_exhaustive()
    }
}

impl<S> ReactorHandle<S> {
    /// Registers a freshly accepted socket with the Reactor.
    pub fn add_connection(&self, stream: S) -> bool {
        self.signals.add_connection(stream)
    }

    /// Runs the shutdown protocol: signal the Reactor, then block until it
    /// acknowledges having drained the worker pool and torn down its
    /// wakeup. Safe to call more than once; only the first call has effect.
    pub fn shutdown(&mut self, timeout: Duration) {
        if self.started_shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.signals.shutdown(timeout);
        let _ = self.ack_rx.recv();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Post-`serve()` cleanup for the case where the Acceptor's loop exited
    /// (or panicked) without ever reaching `shutdown`. Best-effort: if the
    /// Reactor thread is still running we ask it to shut down with no
    /// drain budget and wait briefly, consistent with `WorkerPool::shutdown`'s
    /// "detach rather than fake a kill" resolution for forced termination.
    pub fn ensure_closed(&mut self) {
        if self.thread.as_ref().is_some_and(|t| !t.is_finished()) {
            self.shutdown(Duration::ZERO);
        }
    }
}

/// Owns the live connection set and drives the readiness loop. Build one
/// with [`Reactor::spawn`], which immediately moves it onto its own thread.
pub struct Reactor<S, P, TF, PF> {
    poll: Poll,
    connections: Slab<Arc<Connection<S>>>,
    signal_rx: Receiver<ControlSignal<S>>,
    pool: WorkerPool<S>,
    events_capacity: usize,
    _processor: std::marker::PhantomData<(P, TF, PF)>,
}

// Written by hand: deriving would add spurious `S/P/TF/PF: Debug` bounds —
// connections, the signal queue, and the pool are opaque at this layer.
impl<S, P, TF, PF> std::fmt::Debug for Reactor<S, P, TF, PF> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("connections", &self.connections.len())
            .field("events_capacity", &self.events_capacity)
            .finish_non_exhaustive()
    }
}

impl<S, P, TF, PF> Reactor<S, P, TF, PF>
where
    S: TcpStream + Read + Write + Source + Send + 'static,
    P: Processor + 'static,
    TF: TransportFactory + 'static,
    PF: ProtocolFactory + 'static,
{
    /// Builds the Reactor's state, spawns its worker pool and its own
    /// thread, and returns a handle for registering connections and
    /// triggering shutdown. `num_workers` must be at least 1.
    pub fn spawn(
        num_workers: usize,
        events_capacity: usize,
        processor: Arc<P>,
        transport_factory: Arc<TF>,
        protocol_factory: Arc<PF>,
    ) -> std::io::Result<ReactorHandle<S>> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (signals, signal_rx) = channel(waker);
        let pool = WorkerPool::spawn(num_workers, processor, transport_factory, protocol_factory);

        let reactor = Reactor {
            poll,
            connections: Slab::new(),
            signal_rx,
            pool,
            events_capacity,
            _processor: std::marker::PhantomData,
        };

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let thread = std::thread::Builder::new()
            .name("framed-rpc-reactor".into())
            .spawn(move || reactor.run(ack_tx))
            .expect("failed to spawn reactor thread");

        Ok(ReactorHandle {
            signals,
            ack_rx,
            thread: Some(thread),
            started_shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    fn run(mut self, ack_tx: Sender<()>) {
        let mut events = Events::with_capacity(self.events_capacity);

        'poll: loop {
            if let Err(err) = self.poll.poll(&mut events, None) {
                warn!(error = %err, "reactor poll failed, shutting down");
                break;
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    if let Some(timeout) = self.drain_signals() {
                        self.shutdown_workers(timeout);
                        break 'poll;
                    }
                    continue;
                }

                let token = event.token();
                if event.is_error() {
                    self.remove_connection(token);
                    continue;
                }
                if event.is_readable() {
                    self.handle_readable(token);
                }
            }
        }

        let _ = ack_tx.send(());
        debug!("reactor thread exiting");
    }

    /// Drains every pending control signal. Returns the drain timeout once
    /// a shutdown signal is found, at which point this pass stops processing
    /// further signals or readables.
    fn drain_signals(&mut self) -> Option<Duration> {
        loop {
            match self.signal_rx.try_recv() {
                Ok(ControlSignal::Register(stream)) => self.register_connection(stream),
                Ok(ControlSignal::Shutdown(timeout)) => return Some(timeout),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Duration::ZERO),
            }
        }
    }

    fn register_connection(&mut self, stream: S) {
        let entry = self.connections.vacant_entry();
        let token = Token(entry.key());
        let mut connection = Connection::new(token, stream);

        match self
            .poll
            .registry()
            .register(&mut connection, token, Interest::READABLE)
        {
            Ok(()) => {
                entry.insert(Arc::new(connection));
            }
            Err(err) => warn!(error = %err, "failed to register connection, dropping"),
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let Some(connection) = self.connections.get(token.0).cloned() else {
            return;
        };

        match connection.fill() {
            Ok(FillOutcome::Eof) => {
                // A peer that sends its final frame and closes in the same
                // round trip leaves that frame sitting in the buffer
                // alongside the EOF — dispatch it before tearing down the
                // connection instead of discarding it.
                self.dispatch_frames(token, &connection);
                self.remove_connection(token);
            }
            Ok(FillOutcome::Data(_)) => self.dispatch_frames(token, &connection),
            Err(err) => {
                warn!(connection = token.0, error = %err, "read error, removing connection");
                self.remove_connection(token);
            }
        }
    }

    fn dispatch_frames(&mut self, token: Token, connection: &Arc<Connection<S>>) {
        for payload in connection.take_frames() {
            let item = WorkItem::Frame {
                token,
                connection: connection.clone(),
                payload,
            };
            if self.pool.work_tx.send(item).is_err() {
                warn!(connection = token.0, "worker pool gone, dropping frame");
                break;
            }
        }
    }

    /// Removing the slab entry drops the Reactor's own `Arc`; if a worker
    /// is still mid-write against a clone of the same `Arc`, the socket
    /// stays open until that worker finishes — EOF on the read side never
    /// closes a connection a worker may still be writing to. No explicit
    /// `deregister` call is needed: the underlying fd is closed when the
    /// last `Arc` drops, which removes it from the poll set as a side
    /// effect.
    fn remove_connection(&mut self, token: Token) {
        if self.connections.try_remove(token.0).is_some() {
            debug!(connection = token.0, "connection removed");
        }
    }

    fn shutdown_workers(self, timeout: Duration) {
        // Drop any frames queued but not yet claimed by a worker before
        // posting the shutdown markers, so in-flight-but-unclaimed work is
        // discarded rather than drained by a worker about to stop anyway.
        self.pool.drain_pending();
        for _ in 0..self.pool.len() {
            let _ = self.pool.work_tx.send(WorkItem::Shutdown);
        }
        info!(timeout = ?timeout, "draining worker pool");
        self.pool.shutdown(timeout);
    }
}
