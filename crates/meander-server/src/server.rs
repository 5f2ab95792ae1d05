//! Server wiring and lifecycle.
//!
//! [`Server::start`] builds the whole object graph (context, simulation
//! manager, snapshot streamer), binds the socket (unlinking a stale
//! path), and spawns the accept thread plus the notifier thread that
//! turns manager events into best-effort broadcasts. [`Server::shutdown`]
//! drains everything in order: stop accepting, stop the batch, unblock
//! and join every handler, join the notifier, unlink the path.

use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use meander_engine::{SimEvent, SimManager};
use meander_proto::{EndReason, Message};
use tracing::{debug, info};

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::ipc;
use crate::snapshot::SnapshotStreamer;

/// Default socket path when none is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/meander.sock";

/// Upper bound on worker threads, whatever the host parallelism.
const MAX_WORKER_THREADS: usize = 8;

// ── Config ───────────────────────────────────────────────────────

/// Server construction parameters.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Filesystem path to bind.
    pub socket_path: PathBuf,
    /// Worker threads per batch; `None` auto-sizes from host parallelism.
    pub worker_threads: Option<usize>,
    /// Job queue capacity per batch.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            worker_threads: None,
            queue_capacity: 4096,
        }
    }
}

impl ServerConfig {
    /// Config bound to a specific path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            ..Self::default()
        }
    }

    fn resolved_worker_threads(&self) -> usize {
        match self.worker_threads {
            Some(n) => n.max(1),
            None => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .clamp(1, MAX_WORKER_THREADS),
        }
    }
}

// ── Shared graph ─────────────────────────────────────────────────

/// Everything the accept loop, handlers, and notifier share.
pub(crate) struct ServerShared {
    pub(crate) ctx: Arc<ServerContext>,
    pub(crate) manager: SimManager,
    pub(crate) streamer: SnapshotStreamer,
    pub(crate) worker_threads: usize,
    pub(crate) queue_capacity: usize,
    pub(crate) shutdown: AtomicBool,
    pub(crate) handlers: Mutex<Vec<JoinHandle<()>>>,
}

// ── Server ───────────────────────────────────────────────────────

/// A running Meander server.
pub struct Server {
    shared: Arc<ServerShared>,
    socket_path: PathBuf,
    accept_thread: Option<JoinHandle<()>>,
    notifier_thread: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Server {
    /// Bind the socket and spawn the accept and notifier threads.
    pub fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let ctx = Arc::new(ServerContext::new()?);
        let (event_tx, event_rx) = unbounded();
        let manager = SimManager::new(
            Arc::clone(&ctx) as Arc<dyn meander_engine::StateSink>,
            event_tx,
        );

        let shared = Arc::new(ServerShared {
            ctx,
            manager,
            streamer: SnapshotStreamer::new(),
            worker_threads: config.resolved_worker_threads(),
            queue_capacity: config.queue_capacity,
            shutdown: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
        });

        // A previous run may have left a stale socket entry behind.
        let socket_path = config.socket_path.clone();
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), workers = shared.worker_threads, "server listening");

        let accept_shared = Arc::clone(&shared);
        let accept_thread = thread::Builder::new()
            .name("meander-accept".into())
            .spawn(move || ipc::accept_loop(listener, accept_shared))
            .expect("failed to spawn accept thread");

        let notifier_shared = Arc::clone(&shared);
        let notifier_thread = thread::Builder::new()
            .name("meander-notify".into())
            .spawn(move || notifier_loop(&notifier_shared, &event_rx))
            .expect("failed to spawn notifier thread");

        Ok(Self {
            shared,
            socket_path,
            accept_thread: Some(accept_thread),
            notifier_thread: Some(notifier_thread),
            stopped: false,
        })
    }

    /// The bound socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Drain and stop everything. Safe to call once; `Drop` calls it too.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("server shutting down");

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.manager.request_stop();
        self.shared.manager.join();

        // Unblock handler reads, then join them.
        self.shared.ctx.shutdown_all_clients();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let handlers: Vec<_> = self.shared.handlers.lock().unwrap().drain(..).collect();
        for handle in handlers {
            let _ = handle.join();
        }
        if let Some(handle) = self.notifier_thread.take() {
            let _ = handle.join();
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Notifier ─────────────────────────────────────────────────────

/// Drain manager events into broadcasts. PROGRESS and END use the
/// best-effort variant; the end of a batch additionally streams a final
/// snapshot to every client.
fn notifier_loop(shared: &Arc<ServerShared>, events: &Receiver<SimEvent>) {
    loop {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(SimEvent::Progress {
                current_rep,
                total_reps,
            }) => {
                shared.ctx.broadcast(&Message::Progress {
                    current_rep,
                    total_reps,
                });
            }
            Ok(SimEvent::Ended { stopped }) => {
                let reason = if stopped {
                    EndReason::Stopped
                } else {
                    EndReason::DoneAllReps
                };
                shared.ctx.broadcast(&Message::End { reason });
                let (grid, aggregate) = shared.ctx.world();
                shared.streamer.broadcast(&shared.ctx, &grid, &aggregate);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("notifier exited");
}
