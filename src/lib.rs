#![deny(missing_debug_implementations, rust_2018_idioms, unused_imports)]

//! A nonblocking, framed-RPC server core.
//!
//! Four pieces working together: an Acceptor that blocks on the listening
//! socket, a Reactor thread that multiplexes readiness across every live
//! connection with a single `mio::Poll`, a length-prefixed framer that turns
//! a connection's byte stream into discrete payloads, and a worker pool that
//! dispatches each frame to a caller-supplied [`processor::Processor`].
//!
//! The wire format, concurrency model, and shutdown protocol are this
//! crate's job. What a frame *means* is not — wrap a [`Server`] around your
//! own `Processor` (and, if you need request/response encoding beyond raw
//! bytes, a [`processor::TransportFactory`]/[`processor::ProtocolFactory`]
//! pair) to get a concrete service.
//!
//! ```no_run
//! use framed_rpc::{Server, ServerConfig};
//! use framed_rpc::processor::EchoProcessor;
//!
//! let config = ServerConfig {
//!     bind_addr: "127.0.0.1:9000".parse().unwrap(),
//!     ..ServerConfig::default()
//! };
//! let server = Server::new(config, EchoProcessor);
//! server.serve().unwrap();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod net;
pub mod processor;
pub mod reactor;
pub mod server;
pub mod signal;
pub mod transport;
pub mod worker;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::Server;
