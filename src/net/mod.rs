//! Thin traits over `mio`/`std` networking types so the reactor and acceptor
//! can be exercised against an in-memory stream in tests without opening a
//! real socket.

pub mod tcp_listener;
pub mod tcp_stream;
