//! Per-session worker tasks.
//!
//! [`SessionDispatcher`] owns one tokio task per session, fed over a bounded
//! `mpsc` channel. Each worker routes its session's events one at a time,
//! so a session is handled by a single logical worker while independent
//! sessions proceed concurrently. A full channel applies backpressure to
//! the caller of [`SessionDispatcher::dispatch`]. A worker retires on its
//! own once the router reports its session deleted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::SessionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{DispatchError, Result};
use crate::event::InboundEvent;
use crate::router::EventRouter;

struct Worker {
    tx: mpsc::Sender<InboundEvent>,
    token: CancellationToken,
    handle: JoinHandle<()>,
    generation: u64,
}

type Workers = Mutex<HashMap<SessionId, Worker>>;

/// Fans inbound events out to per-session workers.
pub struct SessionDispatcher {
    router: EventRouter,
    capacity: usize,
    token: CancellationToken,
    workers: Arc<Workers>,
    generation: AtomicU64,
}

impl std::fmt::Debug for SessionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDispatcher")
            .field("capacity", &self.capacity)
            .field("workers", &self.workers.lock().len())
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionDispatcher {
    /// Dispatcher whose channels hold `worker_channel_capacity` events.
    pub fn new(router: EventRouter) -> Self {
        let capacity = router.settings().worker_channel_capacity;
        Self::with_capacity(router, capacity)
    }

    /// Dispatcher with an explicit per-session channel capacity.
    pub fn with_capacity(router: EventRouter, capacity: usize) -> Self {
        Self {
            router,
            capacity: capacity.max(1),
            token: CancellationToken::new(),
            workers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// The router workers feed.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Queue an event on its session's worker, spawning the worker if needed.
    ///
    /// Waits while the session's channel is full. Events for a deleted
    /// session are handed straight to the router, which drops them, and no
    /// worker is spawned.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        if self.router.is_deleted(&event.session_id) {
            let _ = self.router.route(event);
            return Ok(());
        }
        let tx = self.sender(&event.session_id);
        tx.send(event)
            .await
            .map_err(|err| DispatchError::WorkerStopped {
                session_id: err.0.session_id,
            })
    }

    /// Stop the session's worker and release its router state.
    ///
    /// Events still queued for the session are discarded.
    pub fn close_session(&self, session_id: &str) -> bool {
        let worker = self.workers.lock().remove(session_id);
        if let Some(worker) = &worker {
            worker.token.cancel();
        }
        let tracked = self.router.close_session(session_id);
        worker.is_some() || tracked
    }

    /// Number of live workers.
    pub fn active_sessions(&self) -> usize {
        self.workers
            .lock()
            .values()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    /// Close every worker's channel and wait up to `timeout` for queued
    /// events to be routed.
    ///
    /// Unlike [`shutdown`](Self::shutdown) nothing is cancelled, and a later
    /// dispatch spawns a fresh worker. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .drain()
            .map(|(_, worker)| worker.handle)
            .collect();
        debug!(workers = handles.len(), "draining session workers");
        tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok()
    }

    /// Cancel every worker and wait up to `timeout` for them to exit.
    ///
    /// Pending grace timers are cancelled too. Returns `false` on timeout.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.token.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .drain()
            .map(|(_, worker)| worker.handle)
            .collect();
        info!(
            workers = handles.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for session workers"
        );

        let drained = tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok();
        if !drained {
            warn!("session workers did not stop after {timeout:?}");
        }
        let timers = self.router.shutdown();
        debug!(timers, "grace timers cancelled");
        drained
    }

    fn sender(&self, session_id: &SessionId) -> mpsc::Sender<InboundEvent> {
        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get(session_id) {
            if !worker.tx.is_closed() {
                return worker.tx.clone();
            }
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        let token = self.token.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(run_worker(
            self.router.clone(),
            session_id.clone(),
            rx,
            token.clone(),
            Retirement {
                workers: Arc::downgrade(&self.workers),
                generation,
            },
        ));
        let _ = workers.insert(
            session_id.clone(),
            Worker {
                tx: tx.clone(),
                token,
                handle,
                generation,
            },
        );
        debug!(%session_id, generation, "session worker spawned");
        tx
    }
}

/// Lets a worker remove its own entry from the dispatcher.
struct Retirement {
    workers: Weak<Workers>,
    generation: u64,
}

impl Retirement {
    fn retire(&self, session_id: &SessionId) {
        let Some(workers) = self.workers.upgrade() else {
            return;
        };
        let mut workers = workers.lock();
        if workers.get(session_id).is_some_and(|w| w.generation == self.generation) {
            let _ = workers.remove(session_id);
        }
    }
}

#[tracing::instrument(skip_all, fields(session_id = %session_id))]
async fn run_worker(
    router: EventRouter,
    session_id: SessionId,
    mut rx: mpsc::Receiver<InboundEvent>,
    token: CancellationToken,
    retirement: Retirement,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                // Admission failures are already reported by the router.
                let _ = router.route(event);
                if router.is_deleted(&session_id) {
                    retirement.retire(&session_id);
                    rx.close();
                    while let Ok(late) = rx.try_recv() {
                        let _ = router.route(late);
                    }
                    debug!("session deleted, worker retired");
                    break;
                }
            }
        }
    }
    debug!("session worker stopped");
}
