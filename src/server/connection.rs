//! Connection workers and the registry that observes them.
//!
//! Each accepted connection is owned by a [`ConnectionWorker`] running on its
//! own detached thread. The thread holds the only long-lived strong
//! reference, so a worker whose peer disconnects is reclaimed as soon as its
//! loop ends. The supervisor keeps weak references in a [`WorkerRegistry`]
//! purely to deliver stop requests.

use crate::error::{Error, Result};
use crate::socket::{Address, Handle, MutableBuffer};
use slab::Slab;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::debug;

/// Lifecycle of a connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Holds its connection, thread not spawned yet.
    Created = 0,
    /// Echo loop is running on the worker thread.
    Running = 1,
    /// Loop has exited, or the worker was stopped before it started.
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }
}

/// Owner of one accepted connection.
#[derive(Debug)]
pub struct ConnectionWorker {
    id: u64,
    peer: Address,
    handle: Handle,
    state: AtomicU8,
    buffer_size: usize,
}

impl ConnectionWorker {
    /// Wrap an accepted connection. `buffer_size` bounds a single read.
    pub fn new(id: u64, handle: Handle, peer: Address, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            handle,
            state: AtomicU8::new(WorkerState::Created as u8),
            buffer_size: buffer_size.max(1),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Address {
        self.peer
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Spawn the detached echo thread. The thread keeps the worker alive
    /// until its loop ends.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.state
            .compare_exchange(
                WorkerState::Created as u8,
                WorkerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::ProtocolMisuse("connection worker already started or stopped"))?;

        let worker = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("conn-{}", self.id))
            .spawn(move || worker.run());

        match spawned {
            Ok(_detached) => Ok(()),
            Err(e) => {
                self.state
                    .store(WorkerState::Stopped as u8, Ordering::Release);
                Err(Error::system("spawn", &e))
            }
        }
    }

    /// Ask the worker to stop. Returns immediately; a blocked receive wakes
    /// up with zero bytes and the thread finishes on its own.
    pub fn stop(&self) {
        debug!(id = self.id, "stopping connection worker");
        // Never started: nothing will run the loop, so settle the state here.
        let _ = self.state.compare_exchange(
            WorkerState::Created as u8,
            WorkerState::Stopped as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Err(e) = self.handle.shutdown() {
            debug!(id = self.id, error = %e, "shutdown failed");
        }
    }

    fn run(&self) {
        debug!(id = self.id, peer = %self.peer, "connection worker started");
        let mut scratch = vec![0u8; self.buffer_size];

        loop {
            let mut buf = MutableBuffer::from(&mut scratch);
            let n = match self.handle.recv(&mut buf, 0) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.is_os(libc::EINTR) => continue,
                Err(e) => {
                    debug!(id = self.id, error = %e, "receive failed");
                    break;
                }
            };

            debug!(id = self.id, bytes = n, "client got a msg");

            if let Err(e) = self.handle.send_all(buf.truncate(n).freeze(), 0) {
                debug!(id = self.id, error = %e, "send failed");
                break;
            }
        }

        self.state
            .store(WorkerState::Stopped as u8, Ordering::Release);
        debug!(id = self.id, "connection worker exited");
    }
}

/// Weak references to the connection workers spawned by one supervisor.
///
/// Slots of workers that have already been reclaimed are pruned on every
/// insert. Once closed, the registry refuses new workers.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Slab<Weak<ConnectionWorker>>,
    closed: bool,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a worker. Returns `None` if the registry has been closed.
    pub fn insert(&mut self, worker: &Arc<ConnectionWorker>) -> Option<usize> {
        if self.closed {
            return None;
        }
        self.prune();
        Some(self.workers.insert(Arc::downgrade(worker)))
    }

    /// Drop slots whose worker no longer exists. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|_, w| w.strong_count() > 0);
        before - self.workers.len()
    }

    /// Workers that are still alive.
    pub fn live(&self) -> Vec<Arc<ConnectionWorker>> {
        self.workers.iter().filter_map(|(_, w)| w.upgrade()).collect()
    }

    /// Number of tracked slots, dead or alive.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refuse further inserts and hand back every live worker.
    pub fn close(&mut self) -> Vec<Arc<ConnectionWorker>> {
        self.closed = true;
        let live = self.live();
        self.workers.clear();
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{ConstBuffer, Kind, LISTEN_BACKLOG_DEFAULT};
    use std::time::{Duration, Instant};

    fn connected_pair() -> (Handle, Handle, Address) {
        let listener = Handle::open(Kind::Stream).unwrap();
        listener.bind(&Address::localhost(0)).unwrap();
        listener.listen(LISTEN_BACKLOG_DEFAULT).unwrap();

        let client = Handle::open(Kind::Stream).unwrap();
        client.connect(&listener.local_addr().unwrap()).unwrap();

        let mut conn = Handle::new();
        let mut peer = Address::default();
        assert!(listener.accept(&mut conn, Some(&mut peer)));
        (client, conn, peer)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_worker_state_transitions() {
        let (_client, conn, peer) = connected_pair();
        let worker = ConnectionWorker::new(7, conn, peer, 64);
        assert_eq!(worker.id(), 7);
        assert_eq!(worker.state(), WorkerState::Created);

        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(matches!(worker.start(), Err(Error::ProtocolMisuse(_))));

        worker.stop();
        assert!(wait_for(|| worker.state() == WorkerState::Stopped));
    }

    #[test]
    fn test_stop_before_start() {
        let (_client, conn, peer) = connected_pair();
        let worker = ConnectionWorker::new(0, conn, peer, 64);
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(worker.start().is_err());
    }

    #[test]
    fn test_worker_echoes_and_exits_on_peer_close() {
        let (mut client, conn, peer) = connected_pair();
        let worker = ConnectionWorker::new(1, conn, peer, 1024);
        let weak = Arc::downgrade(&worker);
        worker.start().unwrap();
        drop(worker);

        client.send_all(ConstBuffer::from("ping"), 0).unwrap();
        let mut scratch = [0u8; 16];
        let mut buf = MutableBuffer::from(&mut scratch);
        let n = client.recv(&mut buf, 0).unwrap();
        assert_eq!(&*buf.truncate(n), b"ping");

        // Peer shutdown ends the loop and the thread releases the worker.
        client.close();
        assert!(wait_for(|| weak.upgrade().is_none()));
    }

    #[test]
    fn test_registry_tracks_without_owning() {
        let mut registry = WorkerRegistry::new();

        let (_c1, conn1, peer1) = connected_pair();
        let (_c2, conn2, peer2) = connected_pair();
        let w1 = ConnectionWorker::new(1, conn1, peer1, 64);
        let w2 = ConnectionWorker::new(2, conn2, peer2, 64);

        registry.insert(&w1).unwrap();
        registry.insert(&w2).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.live().len(), 2);

        drop(w1);
        assert_eq!(registry.live().len(), 1);
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.len(), 1);

        let live = registry.close();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id(), 2);
        assert!(registry.is_closed());
        assert!(registry.is_empty());
        assert!(registry.insert(&w2).is_none());
    }
}
