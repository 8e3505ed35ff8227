//! The worker pool: a fixed set of threads dequeuing frames and invoking the
//! processor, one thread per `Worker` pulling off a shared
//! `crossbeam_channel::Receiver`.

use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use mio::event::Source;
use mio::Token;
use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionWriter};
use crate::net::tcp_stream::TcpStream;
use crate::processor::{frame_reader, ProtocolFactory, TransportFactory};

/// Walks `err`'s `source()` chain into a single `caused by: ...` string for
/// logging, since `tracing`'s field macros don't do this themselves.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = String::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(" caused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// One unit of dispatchable work, or the poison pill that ends a worker's
/// loop. `Frame` carries everything the worker needs to build the
/// input/output encoders without going back to the Reactor.
pub enum WorkItem<S> {
    /// A complete frame ready to hand to the processor.
    Frame {
        /// Slab token of the originating connection — carried for logging;
        /// the connection itself may already be gone by the time this is
        /// processed.
        token: Token,
        /// Shared handle to the connection, used only to write the
        /// response (workers never read or touch the connection's buffer).
        connection: Arc<Connection<S>>,
        /// The decoded frame payload.
        payload: Bytes,
    },
    /// Told to the worker pool exactly `num_workers` times during shutdown.
    Shutdown,
}

// Written by hand: deriving would add a spurious `S: Debug` bound.
impl<S> std::fmt::Debug for WorkItem<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame { token, payload, .. } => f
                .debug_struct("Frame")
                .field("token", token)
                .field("payload_len", &payload.len())
                .finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A single pool thread. Call [`Worker::run`] on a spawned thread; it
/// returns when it dequeues [`WorkItem::Shutdown`] or the work channel
/// disconnects.
pub struct Worker<S, P, TF, PF> {
    id: usize,
    work_rx: Receiver<WorkItem<S>>,
    processor: Arc<P>,
    transport_factory: Arc<TF>,
    protocol_factory: Arc<PF>,
}

// Written by hand: deriving would add spurious `S/P/TF/PF: Debug` bounds —
// none of these fields are meaningfully printable anyway.
impl<S, P, TF, PF> std::fmt::Debug for Worker<S, P, TF, PF> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<S, P, TF, PF> Worker<S, P, TF, PF>
where
    S: TcpStream + Read + std::io::Write + Source,
    P: crate::processor::Processor,
    TF: TransportFactory,
    PF: ProtocolFactory,
{
    /// Builds one pool member. `id` is only used for diagnostics.
    pub fn new(
        id: usize,
        work_rx: Receiver<WorkItem<S>>,
        processor: Arc<P>,
        transport_factory: Arc<TF>,
        protocol_factory: Arc<PF>,
    ) -> Self {
        Self {
            id,
            work_rx,
            processor,
            transport_factory,
            protocol_factory,
        }
    }

    /// Dequeues work until shutdown. A processor error is caught, logged,
    /// and discarded — it must never unwind past this loop and take the
    /// whole pool down with it.
    pub fn run(self) {
        while let Ok(item) = self.work_rx.recv() {
            match item {
                WorkItem::Shutdown => {
                    debug!(worker = self.id, "worker received shutdown, exiting");
                    return;
                }
                WorkItem::Frame {
                    token,
                    connection,
                    payload,
                } => self.dispatch(token, connection, payload),
            }
        }
        debug!(worker = self.id, "work channel disconnected, exiting");
    }

    fn dispatch(&self, token: Token, connection: Arc<Connection<S>>, payload: Bytes) {
        let mut output_sink = ConnectionWriter::new(connection);
        let mut output_transport = self.transport_factory.get_transport(&mut output_sink);
        let mut output_protocol = self.protocol_factory.get_output_protocol(&mut output_transport);

        let mut reader = frame_reader(payload);
        let mut input_protocol = self.protocol_factory.get_input_protocol(&mut reader);

        if let Err(err) = self
            .processor
            .process(&mut input_protocol, &mut output_protocol)
        {
            error!(
                worker = self.id,
                connection = token.0,
                error = %err,
                source_chain = %error_chain(&err),
                "processor error, discarding"
            );
        }
    }
}

/// A spawned worker pool: the sender half of its work queue, plus enough
/// bookkeeping to drain it under a timeout at shutdown.
pub struct WorkerPool<S> {
    /// Producer handle for the shared work queue, cloned by the Reactor so
    /// it can enqueue frames and, at shutdown, drop a clone to help close
    /// out the channel.
    pub work_tx: Sender<WorkItem<S>>,
    /// A clone of the work queue's receiving end, kept only so the Reactor
    /// can drain unclaimed frames at shutdown via [`WorkerPool::drain_pending`]
    /// — the pool itself never reads from this side.
    work_rx: Receiver<WorkItem<S>>,
    num_workers: usize,
    completions: Receiver<()>,
    handles: Vec<JoinHandle<()>>,
}

// Written by hand for the same reason as `Worker`'s `Debug` impl.
impl<S> std::fmt::Debug for WorkerPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_workers", &self.num_workers)
            .finish_non_exhaustive()
    }
}

impl<S> WorkerPool<S> {
    /// Spawns `num_workers` threads, each running a [`Worker::run`] loop.
    pub fn spawn<P, TF, PF>(
        num_workers: usize,
        processor: Arc<P>,
        transport_factory: Arc<TF>,
        protocol_factory: Arc<PF>,
    ) -> Self
    where
        S: TcpStream + Read + std::io::Write + Source + Send + 'static,
        P: crate::processor::Processor + 'static,
        TF: TransportFactory + 'static,
        PF: ProtocolFactory + 'static,
    {
        let (work_tx, work_rx) = crossbeam_channel::unbounded();
        let (completion_tx, completions) = crossbeam_channel::unbounded();
        let mut handles = Vec::with_capacity(num_workers);

        for id in 0..num_workers {
            let worker = Worker::new(
                id,
                work_rx.clone(),
                processor.clone(),
                transport_factory.clone(),
                protocol_factory.clone(),
            );
            let completion_tx = completion_tx.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("framed-rpc-worker-{id}"))
                    .spawn(move || {
                        worker.run();
                        let _ = completion_tx.send(());
                    })
                    .expect("failed to spawn worker thread"),
            );
        }

        Self {
            work_tx,
            work_rx,
            num_workers,
            completions,
            handles,
        }
    }

    /// Number of threads in the pool.
    pub fn len(&self) -> usize {
        self.num_workers
    }

    /// Drops every frame still sitting in the work queue, unclaimed by any
    /// worker. Called by the Reactor immediately before posting
    /// `num_workers` [`WorkItem::Shutdown`] markers, so a slow consumer
    /// never picks up a frame queued before the shutdown decision was made.
    pub fn drain_pending(&self) {
        while self.work_rx.try_recv().is_ok() {}
    }

    /// Drains the pool given an aggregate `timeout` budget. `timeout ==
    /// Duration::ZERO` skips waiting entirely and goes straight to detach.
    ///
    /// Caller is responsible for clearing the work queue and enqueueing
    /// `num_workers` [`WorkItem::Shutdown`] items *before* calling this —
    /// that's the Reactor's job, since only it may touch the slab of
    /// connections these markers correspond to.
    pub fn shutdown(self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.num_workers;

        if !timeout.is_zero() {
            while remaining > 0 {
                let budget = deadline.saturating_duration_since(Instant::now());
                if budget.is_zero() {
                    break;
                }
                match self.completions.recv_timeout(budget) {
                    Ok(()) => remaining -= 1,
                    Err(_) => break,
                }
            }
        }

        if remaining > 0 {
            warn!(
                still_running = remaining,
                "drain timeout elapsed; detaching worker threads instead of blocking on them \
                 further (safe Rust has no forced thread-kill primitive)"
            );
        }

        // Threads that already signalled completion join instantly; threads
        // still running are left detached by simply dropping their handles.
        for handle in self.handles {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}
