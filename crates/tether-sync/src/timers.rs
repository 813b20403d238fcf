//! Per-session grace timers.
//!
//! One timer per session at most. Arming a session that already has a timer
//! replaces it; timers never stack. Each arm gets a fresh generation number
//! that is handed to the fire callback, so a callback racing a cancel can
//! tell it is stale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::SessionId;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Cancellable, session-scoped one-shot timers.
pub struct GraceTimers {
    period: Duration,
    armed: Mutex<HashMap<SessionId, ArmedTimer>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for GraceTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraceTimers")
            .field("period", &self.period)
            .field("armed", &self.armed.lock().len())
            .finish()
    }
}

impl GraceTimers {
    /// Timers that fire `period` after being armed.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            armed: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Delay between arming and firing.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Arm (or re-arm) the session's timer.
    ///
    /// Returns the new generation, or `None` when called outside a tokio
    /// runtime, in which case nothing is scheduled.
    pub fn arm(&self, session_id: &SessionId, on_fire: impl FnOnce(u64) + Send + 'static) -> Option<u64> {
        let Ok(runtime) = Handle::try_current() else {
            warn!(%session_id, "no tokio runtime, grace timer not armed");
            return None;
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let period = self.period;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(period).await;
            on_fire(generation);
        });
        let previous = self
            .armed
            .lock()
            .insert(session_id.clone(), ArmedTimer { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(%session_id, replaced = previous.generation, generation, "grace timer re-armed");
        } else {
            debug!(%session_id, generation, "grace timer armed");
        }
        Some(generation)
    }

    /// Cancel the session's timer. Returns whether one was armed.
    pub fn cancel(&self, session_id: &str) -> bool {
        let Some(timer) = self.armed.lock().remove(session_id) else {
            return false;
        };
        timer.handle.abort();
        debug!(session_id, generation = timer.generation, "grace timer cancelled");
        true
    }

    /// Cancel every timer. Returns how many were armed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<ArmedTimer> = self.armed.lock().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.handle.abort();
        }
        drained.len()
    }

    /// Forget a timer that has fired, if `generation` is still current.
    pub fn complete(&self, session_id: &str, generation: u64) -> bool {
        let mut armed = self.armed.lock();
        if armed.get(session_id).is_some_and(|t| t.generation == generation) {
            let _ = armed.remove(session_id);
            true
        } else {
            false
        }
    }

    /// Whether the session has a pending timer.
    pub fn is_armed(&self, session_id: &str) -> bool {
        self.armed
            .lock()
            .get(session_id)
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.armed.lock().len()
    }

    /// Whether no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for GraceTimers {
    fn drop(&mut self) {
        for (_, timer) in self.armed.get_mut().drain() {
            timer.handle.abort();
        }
    }
}
