//! Echo servers over the socket layer.
//!
//! - [`StreamServer`]: one accept thread plus one detached thread per
//!   accepted connection.
//! - [`DatagramListenerSet`]: N independently bound datagram handles, one
//!   thread each.
//!
//! Both stop by shutting down the handles their threads block on.

mod connection;
mod datagram;
mod stream;

pub use connection::{ConnectionWorker, WorkerRegistry, WorkerState};
pub use datagram::{DatagramListener, DatagramListenerSet};
pub use stream::StreamServer;

use crate::socket::{with_bind, with_reuse, Address, HandleBuilder, Kind, LISTEN_BACKLOG_DEFAULT};

/// Size of the per-thread scratch buffer; one read never exceeds it.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// How a server endpoint is bound.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub addr: Address,
    pub reuse_addr: bool,
    pub reuse_port: bool,
    /// Pending-connection queue depth (stream only).
    pub backlog: i32,
    pub buffer_size: usize,
}

impl ListenConfig {
    pub fn new(addr: Address) -> Self {
        Self {
            addr,
            reuse_addr: false,
            reuse_port: false,
            backlog: LISTEN_BACKLOG_DEFAULT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Reuse options followed by the bind, in that order.
    pub(crate) fn builder(&self, kind: Kind) -> HandleBuilder {
        HandleBuilder::new(kind)
            .step(with_reuse(self.reuse_addr, self.reuse_port))
            .step(with_bind(self.addr))
    }
}
