//! The server transport: an opaque listener exposing `listen`, `accept`
//! (blocking; unblocks on close), and `close`, kept behind a trait so the
//! Acceptor never depends on a concrete socket type.
//!
//! `mio::net::TcpListener` is always nonblocking, so a literal blocking
//! `accept()` isn't available from it directly. `TcpServerTransport` gives
//! callers a blocking-looking `accept()` by polling internally at a short,
//! fixed interval and checking a shutdown flag between attempts — a
//! portable stand-in for the POSIX trick of unblocking a blocked `accept()`
//! by closing its file descriptor from another thread, which std doesn't
//! expose a cross-platform way to do.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};

/// How often a blocked `accept()` rechecks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The Acceptor's view of the listening socket.
pub trait ServerTransport {
    /// The connection type yielded by `accept`.
    type Stream;

    /// Idempotent: safe to call more than once.
    fn listen(&mut self) -> io::Result<()>;

    /// Blocks until a connection arrives or `close()` has been called, in
    /// which case it returns an `Err`.
    fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Unblocks a concurrent `accept()` call.
    fn close(&self);
}

/// A cloneable handle to a transport's close flag, so something other than
/// the transport's owner can unblock a blocked `accept()` — e.g. `Server`,
/// which hands the transport itself to its own accept loop and otherwise
/// has no way to reach it from `shutdown()`.
#[derive(Debug, Clone)]
pub struct TransportCloseHandle {
    closed: Arc<AtomicBool>,
}

impl TransportCloseHandle {
    /// Unblocks a concurrent `accept()` call on the transport this handle
    /// was taken from.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// `ServerTransport` over a `mio::net::TcpListener`.
#[derive(Debug)]
pub struct TcpServerTransport {
    listener: TcpListener,
    closed: Arc<AtomicBool>,
}

impl TcpServerTransport {
    /// Binds `addr` and returns a transport ready for `listen`/`accept`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The address actually bound (resolves `:0` to the assigned port).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A cloneable handle that can `close()` this transport from elsewhere.
    pub fn close_handle(&self) -> TransportCloseHandle {
        TransportCloseHandle {
            closed: self.closed.clone(),
        }
    }
}

impl ServerTransport for TcpServerTransport {
    type Stream = TcpStream;

    fn listen(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(io::Error::new(io::ErrorKind::Other, "server transport closed"));
            }

            match self.listener.accept() {
                Ok(accepted) => return Ok(accepted),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
