//! Registry for coordinated shutdown of multiple servers
//!
//! A process hosting several FastAGI listeners registers a shutdown handle
//! for each and asks the registry to signal all of them at once, typically
//! from a signal handler. The registry is an explicit value the application
//! owns and passes around; there is no process-global list.

use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

/// Handle for requesting one server's shutdown from outside it.
///
/// Obtained from [`AgiServer::shutdown_handle`](crate::AgiServer::shutdown_handle).
/// Signaling is idempotent and never blocks; the server drains its pool in
/// the background and its `join()` caller observes completion.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    name: String,
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub(crate) fn new(name: String, tx: watch::Sender<bool>) -> Self {
        Self { name, tx }
    }

    /// Listener address this handle controls.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request shutdown. A handle whose server is already gone is a no-op.
    pub fn signal(&self) {
        debug!("requesting shutdown of {}", self.name);
        let _ = self.tx.send(true);
    }
}

/// Collection of shutdown handles signaled together.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: Mutex<Vec<ShutdownHandle>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server's shutdown handle to the registry.
    pub fn register(&self, handle: ShutdownHandle) {
        self.servers.lock().expect("registry lock").push(handle);
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.servers.lock().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal shutdown to every registered server.
    pub fn shutdown_all(&self) {
        let servers = self.servers.lock().expect("registry lock");
        info!("signaling shutdown to {} servers", servers.len());
        for handle in servers.iter() {
            handle.signal();
        }
    }
}
