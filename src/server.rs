//! FastAGI server: TCP acceptor and dynamically sized worker pool
//!
//! The server accepts connections from Asterisk and feeds them through a
//! queue to a pool of worker tasks. A monitor task resizes the pool once a
//! second: it burst-spawns workers while connections are queued (up to the
//! maximum) and keeps a minimum number alive when idle. Workers retire after
//! a fixed number of jobs and the monitor replaces them, so a slow leak in a
//! handler cannot accumulate forever in one task.
//!
//! Handler faults are contained at the job boundary: an error or panic in
//! one call is logged and the worker moves on to the next connection.

use crate::{
    constants::{
        DEFAULT_AGI_PORT, DEFAULT_BIND_HOST, DEFAULT_JOBS_PER_WORKER, DEFAULT_MAX_WORKERS,
        DEFAULT_MIN_WORKERS, MONITOR_TICK_MS, STATS_POLL_INTERVAL,
    },
    error::{AgiError, AgiResult},
    registry::ShutdownHandle,
    session::AgiSession,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::{
    collections::HashMap,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};

/// Application entry point invoked once per accepted call.
///
/// The session is initialized before the handler runs; channel parameters
/// from Asterisk are available through
/// [`AgiSession::channel_params`](crate::AgiSession::channel_params).
/// `params` is the server-level parameter map from
/// [`AgiServerConfig::params`], shared across all calls.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle_call(
        &self,
        session: &mut AgiSession<TcpStream>,
        params: &HashMap<String, String>,
    ) -> AgiResult<()>;
}

/// FastAGI server configuration.
///
/// The defaults match the conventional FastAGI deployment: listen on
/// localhost port 4573 with a pool of 5 to 10 workers, each retiring after
/// 50 jobs.
#[derive(Debug, Clone)]
pub struct AgiServerConfig {
    /// Host or address to bind the listener on
    pub bind_host: String,
    /// TCP port to listen on
    pub port: u16,
    /// Workers kept alive even when idle
    pub min_workers: usize,
    /// Hard ceiling on concurrent workers
    pub max_workers: usize,
    /// Jobs a worker handles before it retires and is replaced
    pub jobs_per_worker: usize,
    /// Periodically log pool occupancy
    pub stats: bool,
    /// Application parameters handed to every call handler invocation
    pub params: HashMap<String, String>,
}

impl Default for AgiServerConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_AGI_PORT,
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            jobs_per_worker: DEFAULT_JOBS_PER_WORKER,
            stats: false,
            params: HashMap::new(),
        }
    }
}

impl AgiServerConfig {
    fn addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Pause after a failed `accept()` before retrying
const ACCEPT_RETRY_DELAY_MS: u64 = 100;

/// Work item carried over the connection queue. `Retire` is the drain
/// sentinel the monitor sends so blocked workers wake up and exit.
enum WorkItem {
    Connection(TcpStream),
    Retire,
}

/// State shared between the acceptor, the monitor, and the workers.
#[derive(Debug)]
struct PoolState {
    queue_tx: mpsc::UnboundedSender<WorkItem>,
    /// Single receiver shared by all workers; locking it is the dequeue
    queue_rx: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    queue_depth: AtomicUsize,
    active_workers: AtomicUsize,
}

/// FastAGI server.
///
/// ```rust,no_run
/// use asterisk_agi_tokio::{
///     AgiResult, AgiServer, AgiServerConfig, AgiSession, CallHandler,
/// };
/// use async_trait::async_trait;
/// use std::collections::HashMap;
/// use tokio::net::TcpStream;
///
/// struct HelloWorld;
///
/// #[async_trait]
/// impl CallHandler for HelloWorld {
///     async fn handle_call(
///         &self,
///         session: &mut AgiSession<TcpStream>,
///         _params: &HashMap<String, String>,
///     ) -> AgiResult<()> {
///         session.answer().await?;
///         session.stream_file("hello-world", "", None).await?;
///         session.hangup(None).await?;
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> AgiResult<()> {
///     let mut server = AgiServer::bind(AgiServerConfig::default()).await?;
///     server.run(HelloWorld).await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct AgiServer {
    config: AgiServerConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    state: Arc<PoolState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgiServer {
    /// Bind the listening socket. Fails with [`AgiError::Bind`] when the
    /// address cannot be bound (typically already in use).
    pub async fn bind(config: AgiServerConfig) -> AgiResult<Self> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| AgiError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("listening for Asterisk connections on {}", local_addr);

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            state: Arc::new(PoolState {
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                queue_depth: AtomicUsize::new(0),
                active_workers: AtomicUsize::new(0),
            }),
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    /// Address the listener is actually bound to. Useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections accepted but not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.state.queue_depth.load(Ordering::SeqCst)
    }

    /// Workers currently alive (idle or handling a call).
    pub fn active_workers(&self) -> usize {
        self.state.active_workers.load(Ordering::SeqCst)
    }

    /// Handle for requesting shutdown from another task, suitable for a
    /// [`ServerRegistry`](crate::ServerRegistry).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.config.addr(), self.shutdown_tx.clone())
    }

    /// Launch the acceptor and the pool monitor in the background.
    ///
    /// Returns immediately; use [`join`](Self::join) to await termination or
    /// [`run`](Self::run) to do both. Calling `start` a second time is a
    /// no-op.
    pub fn start<H: CallHandler>(&mut self, handler: H) {
        let Some(listener) = self.listener.take() else {
            warn!("server on {} already started", self.local_addr);
            return;
        };
        let handler = Arc::new(handler);
        self.tasks.push(tokio::spawn(acceptor(
            listener,
            Arc::clone(&self.state),
            self.shutdown_tx.subscribe(),
        )));
        self.tasks.push(tokio::spawn(monitor(
            self.config.clone(),
            Arc::clone(&self.state),
            handler,
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Wait for the acceptor and monitor to finish. Completes after a
    /// shutdown has been requested and the pool has drained.
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                error!("server task failed: {}", err);
            }
        }
    }

    /// [`start`](Self::start) then [`join`](Self::join).
    pub async fn run<H: CallHandler>(&mut self, handler: H) {
        self.start(handler);
        self.join().await;
    }

    /// Request shutdown without waiting for it.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop accepting connections, drain the worker pool, and wait until
    /// every in-flight call has completed.
    pub async fn shutdown(&mut self) {
        info!("shutting down server on {}", self.local_addr);
        self.signal_shutdown();
        self.join().await;
    }
}

/// Accept connections and enqueue them until shutdown is signaled.
async fn acceptor(
    listener: TcpListener,
    state: Arc<PoolState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {}", peer);
                    state.queue_depth.fetch_add(1, Ordering::SeqCst);
                    if state.queue_tx.send(WorkItem::Connection(stream)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    // persistent failures (fd exhaustion) must not spin
                    warn!("accept failed: {}", err);
                    sleep(Duration::from_millis(ACCEPT_RETRY_DELAY_MS)).await;
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!("listener closed");
}

/// Resize the pool once a second, then drain it on shutdown.
async fn monitor<H: CallHandler>(
    config: AgiServerConfig,
    state: Arc<PoolState>,
    handler: Arc<H>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_worker_id: u64 = 0;
    let mut ticks: u64 = 0;

    loop {
        // Burst-spawn: replenish to the minimum, and add workers while
        // connections are waiting and the pool is under its ceiling.
        loop {
            let active = state.active_workers.load(Ordering::SeqCst);
            let queued = state.queue_depth.load(Ordering::SeqCst);
            let spawn = (active < config.max_workers && queued > 0) || active < config.min_workers;
            if !spawn {
                break;
            }
            state.active_workers.fetch_add(1, Ordering::SeqCst);
            workers.push(tokio::spawn(worker(
                next_worker_id,
                Arc::clone(&state),
                Arc::clone(&handler),
                config.params.clone(),
                config.jobs_per_worker,
            )));
            next_worker_id += 1;
        }

        ticks += 1;
        if config.stats && ticks % STATS_POLL_INTERVAL == 0 {
            info!(
                "pool: {} active workers, {} queued connections",
                state.active_workers.load(Ordering::SeqCst),
                state.queue_depth.load(Ordering::SeqCst),
            );
        }

        tokio::select! {
            _ = sleep(Duration::from_millis(MONITOR_TICK_MS)) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    // Drain: one retire sentinel per live worker wakes everyone blocked on
    // the queue; workers mid-call see theirs after the call completes.
    workers.retain(|w| !w.is_finished());
    debug!("draining {} workers", workers.len());
    for _ in 0..workers.len() {
        let _ = state.queue_tx.send(WorkItem::Retire);
    }
    for worker in workers {
        if let Err(err) = worker.await {
            error!("worker task failed: {}", err);
        }
    }
    info!("worker pool drained");
}

/// Pull connections off the queue until retired, out of budget, or the
/// queue closes.
async fn worker<H: CallHandler>(
    id: u64,
    state: Arc<PoolState>,
    handler: Arc<H>,
    params: HashMap<String, String>,
    jobs_per_worker: usize,
) {
    debug!("worker {} starting", id);
    let mut jobs = 0;
    while jobs < jobs_per_worker {
        let item = {
            let mut rx = state.queue_rx.lock().await;
            rx.recv().await
        };
        match item {
            Some(WorkItem::Connection(stream)) => {
                state.queue_depth.fetch_sub(1, Ordering::SeqCst);
                jobs += 1;
                serve_connection(stream, handler.as_ref(), &params).await;
            }
            Some(WorkItem::Retire) | None => break,
        }
    }
    state.active_workers.fetch_sub(1, Ordering::SeqCst);
    debug!("worker {} retiring after {} jobs", id, jobs);
}

/// Run one call end to end. This is the fault boundary: handler errors and
/// panics are logged here and never reach the worker loop.
async fn serve_connection<H: CallHandler>(
    stream: TcpStream,
    handler: &H,
    params: &HashMap<String, String>,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let mut session = AgiSession::new(stream);

    let outcome = AssertUnwindSafe(async {
        session.initialize().await?;
        handler.handle_call(&mut session, params).await
    })
    .catch_unwind()
    .await;

    match outcome {
        Ok(Ok(())) => debug!("call from {} completed", peer),
        Ok(Err(err)) if err.is_hangup() => debug!("caller {} hung up: {}", peer, err),
        Ok(Err(err)) => warn!("call from {} failed: {}", peer, err),
        Err(panic) => error!(
            "call handler panicked for {}: {}",
            peer,
            panic_message(&panic)
        ),
    }
    session.close().await;
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
