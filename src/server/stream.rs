//! Stream echo server: accept loop plus thread-per-connection workers.

use crate::error::{Error, Result};
use crate::server::connection::{ConnectionWorker, WorkerRegistry};
use crate::server::ListenConfig;
use crate::socket::{with_listen, Address, Handle, Kind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Supervisor owning the listening handle and the accept thread.
///
/// Dropping a running server stops it.
pub struct StreamServer {
    config: ListenConfig,
    listener: Option<Arc<Handle>>,
    local_addr: Option<Address>,
    acceptor: Option<JoinHandle<()>>,
    registry: Arc<Mutex<WorkerRegistry>>,
    next_id: Arc<AtomicU64>,
}

impl StreamServer {
    pub fn new(config: ListenConfig) -> Self {
        Self {
            config,
            listener: None,
            local_addr: None,
            acceptor: None,
            registry: Arc::new(Mutex::new(WorkerRegistry::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bind, listen and spawn the accept thread.
    pub fn start(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Err(Error::ProtocolMisuse("stream server already started"));
        }

        let listener = self
            .config
            .builder(Kind::Stream)
            .step(with_listen(self.config.backlog))
            .build()?;
        let local_addr = listener.local_addr()?;
        let listener = Arc::new(listener);

        *lock(&self.registry) = WorkerRegistry::new();

        let acceptor = {
            let listener = Arc::clone(&listener);
            let registry = Arc::clone(&self.registry);
            let next_id = Arc::clone(&self.next_id);
            let buffer_size = self.config.buffer_size;
            thread::Builder::new()
                .name("acceptor".to_string())
                .spawn(move || accept_loop(&listener, &registry, &next_id, buffer_size))
                .map_err(|e| Error::system("spawn", &e))?
        };

        info!(addr = %local_addr, backlog = self.config.backlog, "tcp server startup");

        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        self.acceptor = Some(acceptor);
        Ok(())
    }

    /// Stop every live worker, shut the listener down and join the accept
    /// thread. Workers finish asynchronously; this does not wait for them.
    pub fn stop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };

        let workers = lock(&self.registry).close();
        for worker in &workers {
            worker.stop();
        }

        if let Err(e) = listener.shutdown() {
            warn!(error = %e, "listener shutdown failed");
        }
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("accept thread panicked");
            }
        }

        self.local_addr = None;
        info!(workers = workers.len(), "tcp server stopped");
        // Last reference: the listening descriptor is closed here.
        drop(listener);
    }

    /// Started and the accept thread is still accepting.
    pub fn is_running(&self) -> bool {
        self.listener.is_some()
            && self
                .acceptor
                .as_ref()
                .is_some_and(|acceptor| !acceptor.is_finished())
    }

    /// Bound address, with the actual port when configured with port 0.
    pub fn local_addr(&self) -> Option<Address> {
        self.local_addr
    }

    /// Number of connection workers still alive.
    pub fn active_workers(&self) -> usize {
        lock(&self.registry).live().len()
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: &Handle,
    registry: &Mutex<WorkerRegistry>,
    next_id: &AtomicU64,
    buffer_size: usize,
) {
    let mut client = Handle::new();
    let mut peer = Address::default();

    while listener.accept(&mut client, Some(&mut peer)) {
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, peer = %peer, "got a client");

        let worker = ConnectionWorker::new(id, client.take(), peer, buffer_size);

        // Registration and start happen under the lock so a concurrent stop
        // either sees this worker or prevents it from being created.
        let mut guard = lock(registry);
        if guard.insert(&worker).is_none() {
            debug!(id, "server stopping, dropping connection");
            break;
        }
        if let Err(e) = worker.start() {
            warn!(id, error = %e, "failed to start connection worker");
        }
    }

    info!("tcp server accept loop exited");
}

fn lock(registry: &Mutex<WorkerRegistry>) -> MutexGuard<'_, WorkerRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
