//! The Acceptor: runs the accept loop and owns the server's lifecycle
//! (`serve`, `shutdown`), guarding shutdown with a mutex so it only runs
//! once regardless of how many threads call it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::TcpStream as MioTcpStream;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::processor::{PassthroughFactory, Processor, ProtocolFactory, TransportFactory};
use crate::reactor::{Reactor, ReactorHandle};
use crate::transport::{ServerTransport, TcpServerTransport, TransportCloseHandle};

/// The nonblocking framed-RPC server: owns the listening socket and the
/// Reactor it hands accepted connections to.
///
/// Generic over the processor and, optionally, the transport/protocol
/// factories a worker uses to wrap each frame — defaulting to
/// [`PassthroughFactory`] for both, matching the crate's out-of-the-box
/// configuration.
pub struct Server<P, TF = PassthroughFactory, PF = PassthroughFactory> {
    config: ServerConfig,
    processor: Arc<P>,
    transport_factory: Arc<TF>,
    protocol_factory: Arc<PF>,
    /// `None` until `serve()` is running; holds the live Reactor handle so
    /// a concurrent `shutdown()` call can reach it. Taking the value out is
    /// what makes a second `shutdown()` call a no-op.
    reactor: Mutex<Option<ReactorHandle<MioTcpStream>>>,
    /// `None` until `serve()` binds the listener; lets `shutdown()` unblock
    /// the accept loop from outside the thread that owns the transport.
    transport_close: Mutex<Option<TransportCloseHandle>>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

// Written by hand: deriving would add spurious `P/TF/PF: Debug` bounds.
impl<P, TF, PF> std::fmt::Debug for Server<P, TF, PF> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("bound_addr", &self.bound_addr.lock().ok().and_then(|g| *g))
            .finish_non_exhaustive()
    }
}

impl<P> Server<P, PassthroughFactory, PassthroughFactory>
where
    P: Processor + 'static,
{
    /// Builds a server with the default passthrough transport/protocol
    /// factories — the frame payload and connection writer are handed to
    /// the processor unwrapped.
    pub fn new(config: ServerConfig, processor: P) -> Self {
        Self::with_factories(config, processor, PassthroughFactory, PassthroughFactory)
    }
}

impl<P, TF, PF> Server<P, TF, PF>
where
    P: Processor + 'static,
    TF: TransportFactory + 'static,
    PF: ProtocolFactory + 'static,
{
    /// Builds a server with caller-supplied transport/protocol factories.
    pub fn with_factories(config: ServerConfig, processor: P, transport_factory: TF, protocol_factory: PF) -> Self {
        Self {
            config,
            processor: Arc::new(processor),
            transport_factory: Arc::new(transport_factory),
            protocol_factory: Arc::new(protocol_factory),
            reactor: Mutex::new(None),
            transport_close: Mutex::new(None),
            bound_addr: Mutex::new(None),
        }
    }

    /// Binds the listening socket, spawns the Reactor and worker pool, then
    /// runs the accept loop until the transport is closed (normally by a
    /// concurrent call to [`Server::shutdown`]).
    ///
    /// On any exit path the transport is closed and the Reactor is told to
    /// finish up via `ensure_closed`, covering the case where the accept
    /// loop ended for a reason other than a deliberate shutdown.
    pub fn serve(&self) -> Result<()> {
        let mut transport = TcpServerTransport::bind(self.config.bind_addr)?;
        transport.listen()?;
        let local_addr = transport.local_addr()?;
        *self.bound_addr.lock().expect("bound_addr mutex poisoned") = Some(local_addr);
        *self.transport_close.lock().expect("transport_close mutex poisoned") = Some(transport.close_handle());
        info!(addr = %local_addr, "listening");

        let handle = Reactor::<MioTcpStream, P, TF, PF>::spawn(
            self.config.num_workers,
            self.config.events_capacity,
            self.processor.clone(),
            self.transport_factory.clone(),
            self.protocol_factory.clone(),
        )?;
        *self.reactor.lock().expect("reactor mutex poisoned") = Some(handle);

        let result = self.accept_loop(&mut transport);

        if let Some(mut handle) = self.reactor.lock().expect("reactor mutex poisoned").take() {
            handle.ensure_closed();
        }
        transport.close();
        self.transport_close.lock().expect("transport_close mutex poisoned").take();
        result
    }

    /// The address actually bound. `None` until `serve()` has started
    /// listening (relevant when `bind_addr`'s port is `0`).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().expect("bound_addr mutex poisoned")
    }

    fn accept_loop(&self, transport: &mut TcpServerTransport) -> Result<()> {
        loop {
            match transport.accept() {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "accepted connection");
                    let reactor = self.reactor.lock().expect("reactor mutex poisoned");
                    match reactor.as_ref() {
                        Some(handle) if handle.add_connection(stream) => {}
                        // Reactor already shutting down, or gone: drop the
                        // connection and keep looping until the transport
                        // itself is closed out from under us.
                        _ => {}
                    }
                }
                Err(err) => {
                    // The expected exit path: `shutdown` closed the
                    // transport to break this loop. Any other I/O error is
                    // logged the same way and also ends the loop.
                    warn!(error = %err, "accept loop exiting");
                    return Ok(());
                }
            }
        }
    }

    /// Runs the shutdown protocol: drains the Reactor and its worker pool
    /// first, then closes the transport to unblock the accept loop so
    /// `serve()` can return. Concurrent or repeated calls are safe — only
    /// the first caller to find a Reactor handle present does anything.
    pub fn shutdown(&self, timeout: Duration, block: bool) {
        let handle = self.reactor.lock().expect("reactor mutex poisoned").take();
        let Some(mut handle) = handle else {
            return;
        };
        let transport_close = self
            .transport_close
            .lock()
            .expect("transport_close mutex poisoned")
            .clone();

        let run = move || {
            handle.shutdown(timeout);
            if let Some(transport_close) = transport_close {
                transport_close.close();
            }
        };

        if block {
            run();
        } else {
            std::thread::Builder::new()
                .name("framed-rpc-shutdown".into())
                .spawn(run)
                .expect("failed to spawn shutdown thread");
        }
    }

    /// Whether `shutdown` (or a crashed `serve()`) has already consumed the
    /// Reactor handle.
    pub fn is_shutting_down(&self) -> bool {
        self.reactor.lock().expect("reactor mutex poisoned").is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::EchoProcessor;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            num_workers: 2,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn single_frame_round_trips_through_a_real_socket() {
        let server = Arc::new(Server::new(test_config(), EchoProcessor));
        let server_clone = server.clone();
        let serve_thread = std::thread::spawn(move || server_clone.serve());

        let addr = loop {
            if let Some(addr) = server.local_addr() {
                break addr;
            }
            std::thread::sleep(Duration::from_millis(5));
        };

        let mut client = StdTcpStream::connect(addr).unwrap();
        let mut frame = 5u32.to_be_bytes().to_vec();
        frame.extend_from_slice(b"hello");
        client.write_all(&frame).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"hello");

        server.shutdown(Duration::from_secs(2), true);
        serve_thread.join().unwrap().unwrap();
    }

    #[test]
    fn second_shutdown_call_is_a_no_op() {
        let server = Arc::new(Server::new(test_config(), EchoProcessor));
        let server_clone = server.clone();
        let serve_thread = std::thread::spawn(move || server_clone.serve());

        while server.local_addr().is_none() {
            std::thread::sleep(Duration::from_millis(5));
        }

        server.shutdown(Duration::ZERO, true);
        server.shutdown(Duration::from_secs(1), true); // no-op, must not block
        serve_thread.join().unwrap().unwrap();
    }

    #[test]
    fn nonblocking_shutdown_returns_immediately() {
        let server = Arc::new(Server::new(test_config(), EchoProcessor));
        let server_clone = server.clone();
        let serve_thread = std::thread::spawn(move || server_clone.serve());

        while server.local_addr().is_none() {
            std::thread::sleep(Duration::from_millis(5));
        }

        let start = std::time::Instant::now();
        server.shutdown(Duration::from_millis(200), false);
        assert!(start.elapsed() < Duration::from_millis(100));

        serve_thread.join().unwrap().unwrap();
    }
}
