//! A live connection: its socket, its per-connection read buffer, and the
//! write-side lock that lets more than one worker safely hand it a response.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::framing::extract_all_frames;
use crate::net::tcp_stream::TcpStream;

/// One read chunk per `fill()` loop iteration, matching the spec's "local
/// scratch buffer" read strategy.
const READ_CHUNK: usize = 4096;
/// Initial read-buffer capacity: one MTU.
const INITIAL_BUFFER_CAPACITY: usize = 1500;

/// Outcome of one `fill()` pass.
#[derive(Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// The peer closed (or the socket errored, which this core treats the
    /// same as a close — see the open question on non-EOF socket errors).
    Eof,
    /// `usize` bytes were appended to the read buffer before the socket
    /// would have blocked.
    Data(usize),
}

/// A live connection, shared between the Reactor (which owns reads and the
/// buffer) and any worker threads currently writing a response to it.
#[derive(Debug)]
pub struct Connection<S> {
    token: Token,
    stream: Mutex<S>,
    buffer: Mutex<BytesMut>,
}

impl<S> Connection<S>
where
    S: TcpStream + Read + Write + Source,
{
    /// Wraps an accepted stream under the given slab token.
    pub fn new(token: Token, stream: S) -> Self {
        Self {
            token,
            stream: Mutex::new(stream),
            buffer: Mutex::new(BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY)),
        }
    }

    /// The slab token this connection is registered under.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Reads all bytes currently available without blocking, appending them
    /// to the read buffer. Only ever called from the Reactor thread.
    pub fn fill(&self) -> io::Result<FillOutcome> {
        let mut stream = self.lock_stream();
        let mut buffer = self.lock_buffer();
        let mut scratch = [0u8; READ_CHUNK];
        let mut total = 0usize;

        loop {
            match stream.read(&mut scratch) {
                Ok(0) => return Ok(FillOutcome::Eof),
                Ok(n) => {
                    buffer.extend_from_slice(&scratch[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FillOutcome::Data(total));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Non-EOF socket errors are treated as EOF.
                Err(_) => return Ok(FillOutcome::Eof),
            }
        }
    }

    /// Drains every complete frame currently sitting in the read buffer.
    pub fn take_frames(&self) -> Vec<Bytes> {
        let mut buffer = self.lock_buffer();
        extract_all_frames(&mut buffer)
    }

    /// Locks the underlying stream. `pub(crate)` so tests in sibling
    /// modules can assert on a mock stream's state; production code should
    /// go through [`ConnectionWriter`] instead.
    pub(crate) fn lock_stream(&self) -> std::sync::MutexGuard<'_, S> {
        self.stream.lock().expect("connection stream mutex poisoned")
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        self.buffer.lock().expect("connection buffer mutex poisoned")
    }
}

impl<S> Source for Connection<S>
where
    S: TcpStream + Read + Write + Source,
{
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.get_mut().unwrap().register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.get_mut().unwrap().reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.get_mut().unwrap().deregister(registry)
    }
}

/// Write-only handle to a connection's socket, serializing concurrent
/// writers behind the connection's stream mutex: two frames from the same
/// connection, handled by different workers, will never interleave response
/// bytes, at the cost of one worker blocking briefly on another's write.
#[derive(Debug)]
pub struct ConnectionWriter<S> {
    connection: Arc<Connection<S>>,
}

// Hand-written for the same reason as `SignalSender`'s `Clone` impl: `Arc`
// clones regardless of whether `S` does.
impl<S> Clone for ConnectionWriter<S> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
        }
    }
}

impl<S> ConnectionWriter<S>
where
    S: TcpStream + Read + Write + Source,
{
    /// Builds a writer over a shared connection handle.
    pub fn new(connection: Arc<Connection<S>>) -> Self {
        Self { connection }
    }
}

impl<S> Write for ConnectionWriter<S>
where
    S: TcpStream + Read + Write + Source,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.connection.lock_stream().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.connection.lock_stream().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tcp_stream::TcpStream as _;
    use std::net::{Shutdown, SocketAddr};

    /// An in-memory stream standing in for a socket, so `Connection` can be
    /// exercised without touching the network.
    #[derive(Debug, Default)]
    struct MockStream {
        inbound: std::io::Cursor<Vec<u8>>,
        outbound: Vec<u8>,
        would_block_after: Option<usize>,
        /// Whether an exhausted `inbound` should report a genuine close
        /// (`Ok(0)`) rather than `WouldBlock`.
        eof: bool,
    }

    impl MockStream {
        fn with_inbound(data: &[u8]) -> Self {
            Self {
                inbound: std::io::Cursor::new(data.to_vec()),
                outbound: Vec::new(),
                would_block_after: None,
                eof: false,
            }
        }

        /// Like `with_inbound`, but the peer has already closed: once `data`
        /// is exhausted, `read` reports `Ok(0)` instead of `WouldBlock`.
        fn with_closed_inbound(data: &[u8]) -> Self {
            Self {
                eof: true,
                ..Self::with_inbound(data)
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inbound.read(buf)?;
            if n == 0 {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl TcpStream for MockStream {
        fn connect(_addr: SocketAddr) -> io::Result<Self> {
            unimplemented!("not exercised in tests")
        }
        fn peer_addr(&self) -> io::Result<SocketAddr> {
            "127.0.0.1:0".parse().map_err(|_| io::ErrorKind::Other.into())
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            "127.0.0.1:0".parse().map_err(|_| io::ErrorKind::Other.into())
        }
        fn shutdown(&self, _how: Shutdown) -> io::Result<()> {
            Ok(())
        }
        fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
            Ok(())
        }
        fn nodelay(&self) -> io::Result<bool> {
            Ok(true)
        }
        fn set_ttl(&self, _ttl: u32) -> io::Result<()> {
            Ok(())
        }
        fn ttl(&self) -> io::Result<u32> {
            Ok(64)
        }
        fn take_error(&self) -> io::Result<Option<io::Error>> {
            Ok(None)
        }
        fn peek(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Source for MockStream {
        fn register(&mut self, _r: &Registry, _t: Token, _i: Interest) -> io::Result<()> {
            Ok(())
        }
        fn reregister(&mut self, _r: &Registry, _t: Token, _i: Interest) -> io::Result<()> {
            Ok(())
        }
        fn deregister(&mut self, _r: &Registry) -> io::Result<()> {
            Ok(())
        }
    }

    fn encode(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn fill_then_would_block_reports_data_read() {
        let stream = MockStream::with_inbound(&encode(b"hello"));
        let conn = Connection::new(Token(0), stream);

        let outcome = conn.fill().unwrap();
        assert_eq!(outcome, FillOutcome::Data(9));

        let frames = conn.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"hello");
    }

    #[test]
    fn empty_inbound_reports_eof() {
        let stream = MockStream::with_closed_inbound(&[]);
        let conn = Connection::new(Token(0), stream);

        let outcome = conn.fill().unwrap();
        assert_eq!(outcome, FillOutcome::Eof);
        assert!(conn.take_frames().is_empty());
    }

    #[test]
    fn not_yet_closed_empty_inbound_reports_no_data() {
        let stream = MockStream::with_inbound(&[]);
        let conn = Connection::new(Token(0), stream);

        let outcome = conn.fill().unwrap();
        assert_eq!(outcome, FillOutcome::Data(0));
        assert!(conn.take_frames().is_empty());
    }

    #[test]
    fn writer_serializes_through_stream_mutex() {
        let stream = MockStream::default();
        let conn = Arc::new(Connection::new(Token(0), stream));
        let mut writer = ConnectionWriter::new(conn.clone());
        writer.write_all(b"response").unwrap();

        let guard = conn.lock_stream();
        assert_eq!(guard.outbound, b"response");
    }
}
