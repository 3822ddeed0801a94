//! Datagram echo listeners, one thread per bound handle.

use crate::error::{Error, Result};
use crate::server::ListenConfig;
use crate::socket::{Address, Handle, HandleBuilder, Kind, MutableBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// One bound datagram handle and the thread echoing on it.
pub struct DatagramListener {
    id: usize,
    handle: Arc<Handle>,
    local_addr: Address,
    received: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl DatagramListener {
    /// Build a handle from `builder` and start echoing on it.
    pub fn start(id: usize, builder: &HandleBuilder, buffer_size: usize) -> Result<Self> {
        let handle = builder.build()?;
        let local_addr = handle.local_addr()?;
        let handle = Arc::new(handle);
        let received = Arc::new(AtomicU64::new(0));

        let thread = {
            let handle = Arc::clone(&handle);
            let received = Arc::clone(&received);
            thread::Builder::new()
                .name(format!("udp-{id}"))
                .spawn(move || serve(id, &handle, &received, buffer_size.max(1)))
                .map_err(|e| Error::system("spawn", &e))?
        };

        Ok(Self {
            id,
            handle,
            local_addr,
            received,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn local_addr(&self) -> Address {
        self.local_addr
    }

    /// Datagrams received so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Shut the handle down and join the thread.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(e) = self.handle.shutdown() {
            warn!(id = self.id, error = %e, "udp handle shutdown failed");
        }
        if thread.join().is_err() {
            warn!(id = self.id, "udp server thread panicked");
        }
        info!(id = self.id, received = self.received(), "udp server stopped");
    }
}

impl Drop for DatagramListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(id: usize, handle: &Handle, received: &AtomicU64, buffer_size: usize) {
    info!(id, "udp server startup");

    let mut scratch = vec![0u8; buffer_size];
    let mut peer = Address::default();

    loop {
        let mut buf = MutableBuffer::from(&mut scratch);
        let n = match handle.recv_from(&mut buf, &mut peer, 0) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.is_os(libc::EINTR) => continue,
            Err(e) => {
                debug!(id, error = %e, "receive failed");
                break;
            }
        };

        received.fetch_add(1, Ordering::Relaxed);
        debug!(id, peer = %peer, bytes = n, "udp server got a msg");

        if let Err(e) = handle.send_to(buf.truncate(n).freeze(), &peer, 0) {
            debug!(id, peer = %peer, error = %e, "send failed");
        }
    }

    debug!(id, "udp server loop exited");
}

/// N datagram listeners sharing one configuration.
///
/// With more than one listener the configuration needs `reuse_port` so that
/// every handle can bind the same port. Dropping the set stops it.
pub struct DatagramListenerSet {
    listeners: Vec<DatagramListener>,
}

impl DatagramListenerSet {
    /// Bind `count` listeners and start their threads.
    ///
    /// With port 0 the first listener picks the port and the rest join it.
    /// If any listener fails to start, those already running are stopped.
    pub fn start(config: &ListenConfig, count: usize) -> Result<Self> {
        let mut config = config.clone();
        let mut listeners = Vec::with_capacity(count);

        for id in 0..count {
            let listener =
                DatagramListener::start(id, &config.builder(Kind::Datagram), config.buffer_size)?;
            if config.addr.port() == 0 {
                config.addr.set_port(listener.local_addr().port());
            }
            listeners.push(listener);
        }

        if let Some(first) = listeners.first() {
            info!(addr = %first.local_addr(), listeners = listeners.len(), "udp servers running");
        }
        Ok(Self { listeners })
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn listeners(&self) -> &[DatagramListener] {
        &self.listeners
    }

    pub fn local_addrs(&self) -> Vec<Address> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    /// Per-listener received-datagram counters, by listener id.
    pub fn received_counts(&self) -> Vec<u64> {
        self.listeners.iter().map(|l| l.received()).collect()
    }

    /// Stop each listener independently.
    pub fn stop(&mut self) {
        for listener in &mut self.listeners {
            listener.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{create_handle, with_bind, with_timeouts, ConstBuffer};
    use std::time::{Duration, Instant};

    fn config(reuse_port: bool) -> ListenConfig {
        let mut config = ListenConfig::new(Address::localhost(0));
        config.reuse_addr = reuse_port;
        config.reuse_port = reuse_port;
        config
    }

    fn client() -> Handle {
        create_handle(
            Kind::Datagram,
            [with_timeouts(5, 5), with_bind(Address::localhost(0))],
        )
        .unwrap()
    }

    fn echo(client: &Handle, server: &Address, msg: &[u8]) -> Vec<u8> {
        let sent = client.send_to(ConstBuffer::new(msg), server, 0).unwrap();
        assert_eq!(sent, msg.len());

        let mut scratch = vec![0u8; 2048];
        let mut buf = MutableBuffer::from(&mut scratch);
        let mut peer = Address::default();
        let n = client.recv_from(&mut buf, &mut peer, 0).unwrap();
        assert_eq!(peer, *server);
        buf.truncate(n).to_vec()
    }

    #[test]
    fn test_single_listener_echo() {
        let set = DatagramListenerSet::start(&config(false), 1).unwrap();
        assert_eq!(set.len(), 1);
        let addr = set.local_addrs()[0];

        let c = client();
        assert_eq!(echo(&c, &addr, b"ping"), b"ping");
        assert_eq!(echo(&c, &addr, b"pong"), b"pong");
        assert_eq!(set.received_counts(), vec![2]);
    }

    #[test]
    fn test_datagram_round_trips_as_a_unit() {
        let set = DatagramListenerSet::start(&config(false), 1).unwrap();
        let addr = set.local_addrs()[0];

        let payload = vec![0xabu8; crate::server::DEFAULT_BUFFER_SIZE];
        assert_eq!(echo(&client(), &addr, &payload), payload);
    }

    #[test]
    fn test_listeners_share_the_port() {
        let set = DatagramListenerSet::start(&config(true), 3).unwrap();
        let addrs = set.local_addrs();
        assert_eq!(addrs.len(), 3);
        assert!(addrs.iter().all(|a| *a == addrs[0]));
    }

    #[test]
    fn test_second_listener_needs_reuse() {
        let err = DatagramListenerSet::start(&config(false), 2)
            .err()
            .expect("second bind should fail");
        assert!(err.is_os(libc::EADDRINUSE));
    }

    #[test]
    fn test_load_is_spread_across_listeners() {
        let set = DatagramListenerSet::start(&config(true), 2).unwrap();
        let addr = set.local_addrs()[0];

        // The kernel picks a listener by hashing the source address, so use
        // a fresh client port for every datagram.
        for i in 0..200 {
            let msg = format!("msg-{i}");
            assert_eq!(echo(&client(), &addr, msg.as_bytes()), msg.as_bytes());
        }

        let counts = set.received_counts();
        assert_eq!(counts.iter().sum::<u64>(), 200);
        assert!(counts.iter().all(|&c| c > 0), "starved listener: {counts:?}");
    }

    #[test]
    fn test_empty_datagram_ends_the_loop() {
        let set = DatagramListenerSet::start(&config(false), 1).unwrap();
        let addr = set.local_addrs()[0];

        let c = create_handle(
            Kind::Datagram,
            [with_timeouts(1, 1), with_bind(Address::localhost(0))],
        )
        .unwrap();
        assert_eq!(c.send_to(ConstBuffer::new(b""), &addr, 0).unwrap(), 0);
        c.send_to(ConstBuffer::from("ping"), &addr, 0).unwrap();

        let mut scratch = [0u8; 16];
        let mut buf = MutableBuffer::from(&mut scratch);
        let mut peer = Address::default();
        let err = c.recv_from(&mut buf, &mut peer, 0).unwrap_err();
        assert!(err.is_os(libc::EAGAIN) || err.is_os(libc::EWOULDBLOCK));
        assert_eq!(set.received_counts(), vec![0]);
    }

    #[test]
    fn test_stop_joins_promptly() {
        let mut set = DatagramListenerSet::start(&config(true), 2).unwrap();
        let start = Instant::now();
        set.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(set.listeners().iter().all(|l| l.thread.is_none()));
    }
}
