use std::net::SocketAddr;

use crate::codec::DEFAULT_MAX_LINE_LENGTH;

/// Default address the listener binds to.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:1350";
/// Default capacity of the shared inbound queue and the downstream request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Deployment parameters for a server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks an ephemeral port.
    pub listen: SocketAddr,
    /// Messages that may wait for the dispatcher before read loops stall.
    pub inbound_capacity: usize,
    /// Requests that may wait for the downstream processor.
    pub downstream_capacity: usize,
    /// Bytes of one line a session buffers before discarding it.
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 1350)),
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            downstream_capacity: DEFAULT_QUEUE_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}
