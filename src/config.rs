//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Tunables for [`crate::server::Server`]: worker count, drain timeout, and
/// whether `shutdown` blocks its caller.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the acceptor binds and listens on.
    pub bind_addr: SocketAddr,
    /// Size of the worker pool.
    pub num_workers: usize,
    /// Aggregate drain budget given to in-flight work during shutdown.
    /// `Duration::ZERO` means "don't wait, terminate workers immediately".
    pub shutdown_timeout: Duration,
    /// Whether `Server::shutdown` blocks its caller until drained.
    pub shutdown_block: bool,
    /// Capacity of the `mio::Events` buffer used by the reactor's poll loop.
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0"
                .parse()
                .expect("hardcoded loopback address is valid"),
            num_workers: 20,
            shutdown_timeout: Duration::ZERO,
            shutdown_block: true,
            events_capacity: 1024,
        }
    }
}
