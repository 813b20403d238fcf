//! Event router.
//!
//! Per session the router keeps a [`SessionSequencer`], a [`SessionPhase`],
//! and at most one grace timer. [`EventRouter::route`] admits an event
//! through the sequencer and applies every released event to the store
//! graph in sequence order while holding the session's lock, so a session
//! is never processed concurrently with itself. Independent sessions do
//! not contend beyond the shared stores.
//!
//! Completion (`session.idle`, `session.status{idle|error}`, `session.error`)
//! arms the grace timer. When it fires and the session is still completing,
//! unmatched optimistic records of the session are purged and the observer
//! is told. A `busy`/`retry` status before that cancels the timer.
//!
//! `session.deleted` releases the session's state and remembers its id, so
//! events arriving for it later are dropped instead of starting over at
//! sequence zero.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tether_core::constants::DELETED_SESSION_MEMORY;
use tether_core::{Clock, Part, RoutingError, SessionId, SessionStatus, ValidationError};
use tether_settings::SyncSettings;
use tether_store::{CommitOutcome, EntityKind, StoreGraph, UpsertOutcome};
use tracing::{debug, warn};

use crate::event::{EventKind, InboundEvent};
use crate::observer::{LoggingObserver, Reconciliation, SyncObserver};
use crate::phase::SessionPhase;
use crate::sequencer::SessionSequencer;
use crate::timers::GraceTimers;

/// Build a store graph configured from sync settings.
pub fn graph_from_settings(settings: &SyncSettings, clock: Arc<dyn Clock>) -> StoreGraph {
    StoreGraph::builder()
        .clock(clock)
        .correlation_window_ms(settings.correlation_window_ms)
        .mutation_capacity(settings.mutation_channel_capacity)
        .build()
}

#[derive(Debug)]
struct SessionState {
    sequencer: SessionSequencer,
    phase: SessionPhase,
    timer: Option<u64>,
    closed: bool,
}

type Slot = Arc<Mutex<SessionState>>;

/// Recently deleted sessions, oldest forgotten first.
#[derive(Debug, Default)]
struct Tombstones {
    order: VecDeque<SessionId>,
    ids: HashSet<SessionId>,
}

impl Tombstones {
    fn insert(&mut self, session_id: SessionId) {
        if !self.ids.insert(session_id.clone()) {
            return;
        }
        self.order.push_back(session_id);
        while self.order.len() > DELETED_SESSION_MEMORY {
            if let Some(oldest) = self.order.pop_front() {
                let _ = self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, session_id: &str) {
        if self.ids.remove(session_id) {
            self.order.retain(|id| id != session_id);
        }
    }

    fn contains(&self, session_id: &str) -> bool {
        self.ids.contains(session_id)
    }
}

struct RouterInner {
    graph: Arc<StoreGraph>,
    settings: SyncSettings,
    observer: Arc<dyn SyncObserver>,
    sessions: DashMap<SessionId, Slot>,
    deleted: Mutex<Tombstones>,
    timers: GraceTimers,
}

/// Routes inbound events into a [`StoreGraph`]. Cheap to clone.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("sessions", &self.inner.sessions.len())
            .field("timers", &self.inner.timers)
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Router reporting outcomes through [`LoggingObserver`].
    pub fn new(graph: Arc<StoreGraph>, settings: SyncSettings) -> Self {
        Self::with_observer(graph, settings, Arc::new(LoggingObserver))
    }

    /// Router reporting outcomes to `observer`.
    pub fn with_observer(
        graph: Arc<StoreGraph>,
        settings: SyncSettings,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        let timers = GraceTimers::new(settings.grace_period());
        Self {
            inner: Arc::new(RouterInner {
                graph,
                settings,
                observer,
                sessions: DashMap::new(),
                deleted: Mutex::new(Tombstones::default()),
                timers,
            }),
        }
    }

    /// The graph events are applied to.
    pub fn graph(&self) -> &Arc<StoreGraph> {
        &self.inner.graph
    }

    /// Settings the router was built with.
    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Start (or restart) tracking a session, expecting `next_sequence` next.
    ///
    /// A session previously deleted is accepted again.
    pub fn open_session(&self, session_id: impl Into<SessionId>, next_sequence: u64) {
        let session_id = session_id.into();
        self.inner.deleted.lock().remove(&session_id);
        if let Some(previous) = self.inner.release(&session_id) {
            previous.lock().closed = true;
        }
        let state = self.inner.new_state(session_id.clone(), next_sequence);
        let _ = self.inner.sessions.insert(session_id, Arc::new(Mutex::new(state)));
    }

    /// Stop tracking a session, cancelling its grace timer.
    ///
    /// Returns whether the session was tracked. Store contents are left
    /// alone.
    pub fn close_session(&self, session_id: &str) -> bool {
        let Some(slot) = self.inner.release(session_id) else {
            return false;
        };
        slot.lock().closed = true;
        debug!(session_id, "session closed");
        true
    }

    /// Cancel every grace timer. Returns how many were pending.
    pub fn shutdown(&self) -> usize {
        self.inner.timers.cancel_all()
    }

    /// Admit one event and apply everything it releases.
    ///
    /// Returns the number of events applied, zero when the event was
    /// buffered. `Err` means this event was dropped at admission. Failures
    /// of individual released events go to the observer and do not stop
    /// the rest. Events released after a `session.deleted` are dropped.
    pub fn route(&self, event: InboundEvent) -> Result<usize, RoutingError> {
        let session_id = event.session_id.clone();
        let Some(slot) = self.inner.slot(&session_id) else {
            let err = RoutingError::SessionDeleted {
                event_id: event.event_id,
                session_id: session_id.clone(),
            };
            self.inner.dropped(&session_id, &err);
            return Err(err);
        };
        let mut state = slot.lock();
        if state.closed {
            // Released while this call waited on the lock.
            drop(state);
            return self.route(event);
        }

        let ready = match state.sequencer.admit(event) {
            Ok(ready) => ready,
            Err(err) => {
                self.inner.dropped(&session_id, &err);
                return Err(err);
            }
        };
        if ready.is_empty() {
            debug!(
                %session_id,
                cursor = state.sequencer.cursor(),
                buffered = state.sequencer.buffered(),
                "event buffered"
            );
        }

        let mut applied = 0;
        for event in ready {
            if state.closed {
                let err = RoutingError::SessionDeleted {
                    event_id: event.event_id,
                    session_id: session_id.clone(),
                };
                self.inner.dropped(&session_id, &err);
                continue;
            }
            applied += 1;
            if let Err(err) = self.apply(&session_id, &mut state, event) {
                self.inner.dropped(&session_id, &err);
            }
        }
        Ok(applied)
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Current phase of a tracked session.
    pub fn phase(&self, session_id: &str) -> Option<SessionPhase> {
        self.inner.existing(session_id).map(|slot| slot.lock().phase)
    }

    /// Next expected sequence of a tracked session.
    pub fn cursor(&self, session_id: &str) -> Option<u64> {
        self.inner
            .existing(session_id)
            .map(|slot| slot.lock().sequencer.cursor())
    }

    /// Events buffered for a session while waiting on a gap.
    pub fn buffered(&self, session_id: &str) -> usize {
        self.inner
            .existing(session_id)
            .map_or(0, |slot| slot.lock().sequencer.buffered())
    }

    /// Whether the session has a pending grace timer.
    pub fn has_pending_timer(&self, session_id: &str) -> bool {
        self.inner.timers.is_armed(session_id)
    }

    /// Number of sessions with router state.
    pub fn tracked_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Whether the session was deleted and its events are now dropped.
    pub fn is_deleted(&self, session_id: &str) -> bool {
        self.inner.deleted.lock().contains(session_id)
    }

    // ── Application ─────────────────────────────────────────────────

    fn apply(
        &self,
        session_id: &SessionId,
        state: &mut SessionState,
        event: InboundEvent,
    ) -> Result<(), RoutingError> {
        let kind = EventKind::parse(&event)?;
        if let Some(payload) = kind.payload_session() {
            if payload != session_id {
                return Err(RoutingError::SessionMismatch {
                    event_id: event.event_id,
                    envelope: session_id.clone(),
                    payload: payload.clone(),
                });
            }
        }
        let label = kind.as_str();
        debug!(
            %session_id,
            event_id = %event.event_id,
            sequence = event.sequence,
            event_type = label,
            "routing event"
        );

        let graph = &self.inner.graph;
        match kind {
            EventKind::SessionUpserted(session) => {
                let _ = graph.sessions().upsert(session);
            }
            EventKind::SessionDeleted { .. } => {
                let _ = graph.sessions().remove(session_id);
                state.closed = true;
                self.inner.deleted.lock().insert(session_id.clone());
                let _ = self.inner.release(session_id);
                debug!(%session_id, "session deleted, state released");
            }
            EventKind::SessionStatus { status, .. } => {
                let streaming = status.is_streaming();
                let _ = graph.sessions().set_status(session_id, status);
                if streaming {
                    self.restart(session_id, state);
                } else {
                    self.complete(session_id, state);
                }
            }
            EventKind::SessionIdle { .. } => {
                let _ = graph.sessions().set_status(session_id, SessionStatus::Idle);
                self.complete(session_id, state);
            }
            EventKind::SessionError { message, .. } => {
                let _ = graph
                    .sessions()
                    .set_status(session_id, SessionStatus::Error { message });
                self.complete(session_id, state);
            }
            EventKind::MessageUpdated(message) => {
                state.phase = state.phase.on_content();
                if message.is_optimistic() {
                    self.staged(session_id, graph.messages().upsert(message));
                } else {
                    let id = message.id.to_string();
                    let result = graph.commit_message(message);
                    self.committed(session_id, EntityKind::Message, id, result);
                }
            }
            EventKind::MessageRemoved { message_id, .. } => match graph.messages().get(&message_id) {
                Some(message) if message.session_id != *session_id => {
                    return Err(RoutingError::NotOwned {
                        event_id: event.event_id,
                        record_id: message_id.to_string(),
                        owner: message.session_id.to_string(),
                    });
                }
                Some(_) => {
                    let _ = graph.messages().remove(&message_id);
                }
                None => debug!(%session_id, %message_id, "removal of unknown message ignored"),
            },
            EventKind::PartUpdated(part) => {
                state.phase = state.phase.on_content();
                if part.is_optimistic() {
                    self.staged(session_id, graph.parts().upsert(part));
                } else {
                    let id = part.id.to_string();
                    let result = graph.commit_part(part);
                    self.committed(session_id, EntityKind::Part, id, result);
                }
            }
            EventKind::PartDelta { part_id, delta, .. } => {
                state.phase = state.phase.on_content();
                if !graph.parts().append_delta(&part_id, &delta) {
                    debug!(%session_id, %part_id, "delta for unknown or non-text part ignored");
                }
            }
            EventKind::PartRemoved {
                message_id, part_id, ..
            } => match graph.parts().get(&part_id) {
                Some(part) => {
                    let owner = part_session(graph, &part);
                    if part.message_id != message_id || owner.as_ref() != Some(session_id) {
                        return Err(RoutingError::NotOwned {
                            event_id: event.event_id,
                            record_id: part_id.to_string(),
                            owner: format!("{}/{}", owner.as_deref().unwrap_or("-"), part.message_id),
                        });
                    }
                    let _ = graph.parts().remove(&part_id);
                }
                None => debug!(%session_id, %part_id, "removal of unknown part ignored"),
            },
            EventKind::PermissionRequested(request) => {
                let _ = graph.permissions().upsert(request);
            }
            EventKind::PermissionReplied { request_id, .. } => {
                let _ = graph.permissions().remove(&request_id);
            }
            EventKind::QuestionRequested(request) => {
                let _ = graph.questions().upsert(request);
            }
            EventKind::QuestionReplied { request_id, .. } => {
                let _ = graph.questions().remove(&request_id);
            }
            EventKind::Unrecognized { event_type } => {
                return Err(RoutingError::UnknownEventType {
                    event_id: event.event_id,
                    event_type,
                });
            }
        }
        counter!("sync_events_routed_total", "type" => label).increment(1);
        Ok(())
    }

    fn staged(&self, session_id: &SessionId, result: tether_store::Result<UpsertOutcome>) {
        if let Err(err) = result {
            self.inner.rejected(session_id, &err);
        }
    }

    fn committed(
        &self,
        session_id: &SessionId,
        kind: EntityKind,
        canonical_id: String,
        result: tether_store::Result<CommitOutcome>,
    ) {
        match result {
            Ok(CommitOutcome::Reconciled { replaced, strategy }) => {
                self.inner.observer.on_reconciled(
                    session_id,
                    &Reconciliation {
                        kind,
                        from: replaced,
                        to: canonical_id,
                        strategy,
                    },
                );
            }
            Ok(CommitOutcome::Inserted | CommitOutcome::Updated | CommitOutcome::Rejected) => {}
            Err(err) => self.inner.rejected(session_id, &err),
        }
    }

    fn restart(&self, session_id: &SessionId, state: &mut SessionState) {
        state.phase = SessionPhase::Streaming;
        if state.timer.take().is_some() && self.inner.timers.cancel(session_id) {
            debug!(%session_id, "stream restarted, orphan purge cancelled");
        }
    }

    fn complete(&self, session_id: &SessionId, state: &mut SessionState) {
        state.phase = SessionPhase::Completing;
        let inner: Weak<RouterInner> = Arc::downgrade(&self.inner);
        let sid = session_id.clone();
        state.timer = self.inner.timers.arm(session_id, move |generation| {
            if let Some(inner) = inner.upgrade() {
                inner.fire(&sid, generation);
            }
        });
    }
}

/// Session a part belongs to, from its own field or through its message.
fn part_session(graph: &StoreGraph, part: &Part) -> Option<SessionId> {
    part.session_id
        .clone()
        .or_else(|| graph.messages().get(&part.message_id).map(|m| m.session_id))
}

impl RouterInner {
    fn new_state(&self, session_id: SessionId, cursor: u64) -> SessionState {
        SessionState {
            sequencer: SessionSequencer::new(
                session_id,
                cursor,
                self.settings.dedup_window,
                self.settings.max_buffered_events,
            ),
            phase: SessionPhase::Connecting,
            timer: None,
            closed: false,
        }
    }

    fn existing(&self, session_id: &str) -> Option<Slot> {
        self.sessions.get(session_id).map(|slot| Arc::clone(slot.value()))
    }

    /// State for a session, created on first use unless it was deleted.
    fn slot(&self, session_id: &SessionId) -> Option<Slot> {
        if let Some(slot) = self.existing(session_id) {
            return Some(slot);
        }
        if self.deleted.lock().contains(session_id) {
            return None;
        }
        let entry = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(self.new_state(session_id.clone(), 0))));
        Some(Arc::clone(entry.value()))
    }

    /// Drop router state for a session without touching its lock.
    fn release(&self, session_id: &str) -> Option<Slot> {
        let _ = self.timers.cancel(session_id);
        self.sessions.remove(session_id).map(|(_, slot)| slot)
    }

    fn fire(&self, session_id: &SessionId, generation: u64) {
        let Some(slot) = self.existing(session_id) else {
            return;
        };
        let mut state = slot.lock();
        if state.closed
            || state.phase != SessionPhase::Completing
            || state.timer != Some(generation)
        {
            debug!(%session_id, generation, "stale grace timer ignored");
            return;
        }
        state.timer = None;
        state.phase = SessionPhase::Idle;
        let _ = self.timers.complete(session_id, generation);

        let report = self.graph.purge_orphans(session_id);
        counter!("sync_orphans_purged_total")
            .increment(u64::try_from(report.total()).unwrap_or(u64::MAX));
        self.observer.on_orphans_purged(session_id, &report);
    }

    fn dropped(&self, session_id: &SessionId, err: &RoutingError) {
        counter!("sync_events_dropped_total", "reason" => err.kind()).increment(1);
        if matches!(err, RoutingError::Duplicate { .. }) {
            debug!(%session_id, error = %err, "duplicate event dropped");
        } else {
            warn!(%session_id, kind = err.kind(), error = %err, "event dropped");
        }
        self.observer.on_routing_error(session_id, err);
    }

    fn rejected(&self, session_id: &SessionId, err: &ValidationError) {
        counter!("sync_validation_errors_total").increment(1);
        self.observer.on_validation_error(session_id, err);
    }
}
