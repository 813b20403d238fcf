//! Callbacks surfacing router outcomes to the owning controller.

use parking_lot::Mutex;
use tether_core::{RoutingError, SessionId, ValidationError};
use tether_store::{EntityKind, MatchStrategy, PurgeReport};
use tracing::{debug, info, warn};

/// A canonical record that replaced an optimistic one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// Store the records live in.
    pub kind: EntityKind,
    /// Optimistic id that was replaced.
    pub from: String,
    /// Canonical id.
    pub to: String,
    /// Strategy that produced the match.
    pub strategy: MatchStrategy,
}

/// Receives router outcomes. Every method defaults to a no-op.
pub trait SyncObserver: Send + Sync {
    /// A canonical write failed foreign-key validation.
    fn on_validation_error(&self, _session_id: &SessionId, _error: &ValidationError) {}

    /// An inbound event was dropped.
    fn on_routing_error(&self, _session_id: &SessionId, _error: &RoutingError) {}

    /// An optimistic record was replaced by its canonical counterpart.
    fn on_reconciled(&self, _session_id: &SessionId, _reconciliation: &Reconciliation) {}

    /// The grace window elapsed and unmatched optimistic records were purged.
    fn on_orphans_purged(&self, _session_id: &SessionId, _report: &PurgeReport) {}
}

/// Default observer: logs outcomes through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingObserver;

impl SyncObserver for LoggingObserver {
    fn on_validation_error(&self, session_id: &SessionId, error: &ValidationError) {
        warn!(%session_id, %error, "canonical record rejected");
    }

    fn on_routing_error(&self, session_id: &SessionId, error: &RoutingError) {
        debug!(%session_id, kind = error.kind(), %error, "event dropped");
    }

    fn on_reconciled(&self, session_id: &SessionId, r: &Reconciliation) {
        debug!(
            %session_id,
            kind = r.kind.as_str(),
            from = %r.from,
            to = %r.to,
            strategy = r.strategy.as_str(),
            "reconciled"
        );
    }

    fn on_orphans_purged(&self, session_id: &SessionId, report: &PurgeReport) {
        if !report.is_empty() {
            info!(
                %session_id,
                messages = report.messages.len(),
                parts = report.parts.len(),
                "optimistic records failed to reconcile"
            );
        }
    }
}

/// One recorded callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observed {
    /// [`SyncObserver::on_validation_error`]
    Validation(SessionId, ValidationError),
    /// [`SyncObserver::on_routing_error`]
    Routing(SessionId, RoutingError),
    /// [`SyncObserver::on_reconciled`]
    Reconciled(SessionId, Reconciliation),
    /// [`SyncObserver::on_orphans_purged`]
    Purged(SessionId, PurgeReport),
}

/// Observer that records every callback, for tests and the CLI.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every callback so far, in order.
    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }

    /// Recorded routing errors.
    pub fn routing_errors(&self) -> Vec<RoutingError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Routing(_, err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded validation errors.
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Validation(_, err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded reconciliations.
    pub fn reconciliations(&self) -> Vec<Reconciliation> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Reconciled(_, r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded purges.
    pub fn purges(&self) -> Vec<PurgeReport> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Purged(_, report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, observed: Observed) {
        self.events.lock().push(observed);
    }
}

impl SyncObserver for RecordingObserver {
    fn on_validation_error(&self, session_id: &SessionId, error: &ValidationError) {
        self.push(Observed::Validation(session_id.clone(), error.clone()));
    }

    fn on_routing_error(&self, session_id: &SessionId, error: &RoutingError) {
        self.push(Observed::Routing(session_id.clone(), error.clone()));
    }

    fn on_reconciled(&self, session_id: &SessionId, reconciliation: &Reconciliation) {
        self.push(Observed::Reconciled(session_id.clone(), reconciliation.clone()));
    }

    fn on_orphans_purged(&self, session_id: &SessionId, report: &PurgeReport) {
        self.push(Observed::Purged(session_id.clone(), report.clone()));
    }
}
