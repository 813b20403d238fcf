//! The wired store graph.
//!
//! [`StoreGraphBuilder`] creates every store first and then injects the
//! relationships between them in one pass:
//!
//! ```text
//!   sessions ──cascade──▶ messages ──cascade──▶ parts
//!      │  ▲                  │  ▲                 │
//!      │  └────validate──────┘  └────validate─────┘
//!      ├──cascade──▶ permissions
//!      └──cascade──▶ questions
//! ```
//!
//! Cascades hold child stores strongly; validators hold parent stores
//! weakly, so the graph has no reference cycles. Nothing is rewired after
//! [`StoreGraphBuilder::build`] returns.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tether_core::constants::DEFAULT_CORRELATION_WINDOW_MS;
use tether_core::{
    Clock, Message, MessageId, OptimisticSource, Part, PartId, PermissionRequest, QuestionRequest,
    Session, SystemClock, ValidationError,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::mutation::{MutationSink, StoreMutation};
use crate::reconcile::{CommitOutcome, MatchContext};
use crate::store::{Result, UpsertOutcome, ValidationPolicy, Validator};
use crate::stores::{MessageStore, PartStore, PermissionStore, QuestionStore, SessionStore};

const DEFAULT_MUTATION_CAPACITY: usize = 1024;

/// Configures and wires a [`StoreGraph`].
#[derive(Default)]
pub struct StoreGraphBuilder {
    policy: ValidationPolicy,
    clock: Option<Arc<dyn Clock>>,
    correlation_window_ms: Option<i64>,
    mutation_capacity: Option<usize>,
}

impl StoreGraphBuilder {
    /// Policy applied to foreign-key violations in the message and part stores.
    #[must_use]
    pub fn validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Clock used for optimistic timestamps and the correlation window.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Window for `parent-window-role` message matching.
    #[must_use]
    pub fn correlation_window_ms(mut self, window_ms: i64) -> Self {
        self.correlation_window_ms = Some(window_ms);
        self
    }

    /// Buffer size of the mutation feed.
    #[must_use]
    pub fn mutation_capacity(mut self, capacity: usize) -> Self {
        self.mutation_capacity = Some(capacity.max(1));
        self
    }

    /// Create the stores and inject their relationships.
    pub fn build(self) -> StoreGraph {
        let sink = MutationSink::new(self.mutation_capacity.unwrap_or(DEFAULT_MUTATION_CAPACITY));

        let sessions = Arc::new(SessionStore::new());
        let messages = Arc::new(MessageStore::with_policy(self.policy.clone()));
        let parts = Arc::new(PartStore::with_policy(self.policy));
        let permissions = Arc::new(PermissionStore::new());
        let questions = Arc::new(QuestionStore::new());

        let session_ref = Arc::downgrade(&sessions);
        messages.wire_validator(Validator::new(
            move |sid| session_ref.upgrade().is_some_and(|s| s.contains(sid)),
            |m: &Message| ValidationError::MissingSession {
                message_id: m.id.clone(),
                session_id: m.session_id.clone(),
            },
        ));

        let message_ref = Arc::downgrade(&messages);
        parts.wire_validator(Validator::new(
            move |mid| message_ref.upgrade().is_some_and(|m| m.contains(mid)),
            |p: &Part| ValidationError::MissingMessage {
                part_id: p.id.clone(),
                message_id: p.message_id.clone(),
            },
        ));

        {
            let messages = Arc::clone(&messages);
            let permissions = Arc::clone(&permissions);
            let questions = Arc::clone(&questions);
            sessions.wire_cascade(move |session: &Session| {
                let removed = messages.remove_by_index(&session.id).len()
                    + permissions.remove_by_index(&session.id).len()
                    + questions.remove_by_index(&session.id).len();
                debug!(session_id = %session.id, removed, "session cascade");
            });
        }
        {
            let parts = Arc::clone(&parts);
            messages.wire_cascade(move |message: &Message| {
                let _ = parts.remove_by_index(&message.id);
            });
        }

        sessions.wire_sink(sink.clone());
        messages.wire_sink(sink.clone());
        parts.wire_sink(sink.clone());
        permissions.wire_sink(sink.clone());
        questions.wire_sink(sink.clone());

        StoreGraph {
            sessions,
            messages,
            parts,
            permissions,
            questions,
            sink,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            correlation_window_ms: self
                .correlation_window_ms
                .unwrap_or(DEFAULT_CORRELATION_WINDOW_MS),
        }
    }
}

/// Optimistic records removed by an orphan purge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Purged messages, sorted.
    pub messages: Vec<MessageId>,
    /// Purged parts, sorted.
    pub parts: Vec<PartId>,
}

impl PurgeReport {
    /// Whether nothing was purged.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.parts.is_empty()
    }

    /// Number of purged records.
    pub fn total(&self) -> usize {
        self.messages.len() + self.parts.len()
    }
}

/// Point-in-time copy of every store, each sorted by id.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphSnapshot {
    /// Sessions.
    pub sessions: Vec<Session>,
    /// Messages.
    pub messages: Vec<Message>,
    /// Parts.
    pub parts: Vec<Part>,
    /// Pending permission requests.
    pub permissions: Vec<PermissionRequest>,
    /// Pending questions.
    pub questions: Vec<QuestionRequest>,
}

/// The five stores, wired together.
pub struct StoreGraph {
    sessions: Arc<SessionStore>,
    messages: Arc<MessageStore>,
    parts: Arc<PartStore>,
    permissions: Arc<PermissionStore>,
    questions: Arc<QuestionStore>,
    sink: MutationSink,
    clock: Arc<dyn Clock>,
    correlation_window_ms: i64,
}

impl std::fmt::Debug for StoreGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreGraph")
            .field("sessions", &self.sessions.len())
            .field("messages", &self.messages.len())
            .field("parts", &self.parts.len())
            .field("permissions", &self.permissions.len())
            .field("questions", &self.questions.len())
            .finish_non_exhaustive()
    }
}

impl StoreGraph {
    /// Start configuring a graph.
    pub fn builder() -> StoreGraphBuilder {
        StoreGraphBuilder::default()
    }

    /// Session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Message store.
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Part store.
    pub fn parts(&self) -> &PartStore {
        &self.parts
    }

    /// Permission request store.
    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    /// Question request store.
    pub fn questions(&self) -> &QuestionStore {
        &self.questions
    }

    /// Clock shared with the graph's owner.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Subscribe to committed mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreMutation> {
        self.sink.subscribe()
    }

    fn match_context(&self) -> MatchContext {
        MatchContext {
            now_ms: self.clock.now_ms(),
            window_ms: self.correlation_window_ms,
        }
    }

    // ── Optimistic writes ───────────────────────────────────────────

    /// Store a speculative message stamped with the current time.
    pub fn stage_message(&self, message: Message, source: OptimisticSource) -> Result<UpsertOutcome> {
        let message = message.into_optimistic(source, self.clock.now_ms());
        self.messages.upsert(message)
    }

    /// Store a speculative part stamped with the current time.
    pub fn stage_part(&self, part: Part, source: OptimisticSource) -> Result<UpsertOutcome> {
        let part = part.into_optimistic(source, self.clock.now_ms());
        self.parts.upsert(part)
    }

    // ── Canonical writes ────────────────────────────────────────────

    /// Commit a canonical message, reconciling it with any optimistic match.
    ///
    /// When the match had a different id, the replaced message's parts are
    /// moved to the canonical id instead of being cascaded away. Parts of
    /// swept duplicates are purged. The part store stays write-locked from
    /// before the message swap until its parts have followed, so no reader
    /// sees parts of a message that is already gone.
    pub fn commit_message(&self, message: Message) -> Result<CommitOutcome> {
        let id = message.id.clone();
        let ctx = self.match_context();
        self.parts.locked(|parts| {
            self.messages.commit_canonical_with(message, &ctx, |outcome, swept| {
                if let Some(old) = outcome.id_change(&id) {
                    let moved = parts.reparent(old, &id, |part| part.set_message(id.clone()));
                    debug!(from = old, to = %id, moved, "re-pointed parts at canonical message");
                }
                for stale in swept {
                    let purged = parts.purge_index(stale);
                    debug!(message_id = %stale, purged, "purged parts of swept message");
                }
            })
        })
    }

    /// Commit a canonical part, reconciling it with any optimistic match.
    pub fn commit_part(&self, part: Part) -> Result<CommitOutcome> {
        self.parts.commit_canonical(part, &self.match_context())
    }

    // ── Orphans ─────────────────────────────────────────────────────

    /// Whether any optimistic record of the session is still unmatched.
    pub fn has_optimistic(&self, session_id: &str) -> bool {
        if !self.messages.optimistic_in(session_id).is_empty() {
            return true;
        }
        let message_ids = self.message_ids(session_id);
        !self
            .parts
            .find(|p| p.is_optimistic() && belongs_to(p, session_id, &message_ids))
            .is_empty()
    }

    /// Drop every unmatched optimistic message and part of a session.
    ///
    /// Canonical records are never touched, except canonical parts attached
    /// to a purged optimistic message, which go with it.
    pub fn purge_orphans(&self, session_id: &str) -> PurgeReport {
        let message_ids = self.message_ids(session_id);
        let mut parts: Vec<PartId> = self
            .parts
            .find(|p| p.is_optimistic() && belongs_to(p, session_id, &message_ids))
            .into_iter()
            .filter_map(|p| self.parts.purge(&p.id))
            .map(|p| p.id)
            .collect();
        let mut messages: Vec<MessageId> = self
            .messages
            .optimistic_in(session_id)
            .into_iter()
            .filter_map(|m| self.messages.purge(&m.id))
            .map(|m| m.id)
            .collect();
        parts.sort();
        messages.sort();

        let report = PurgeReport { messages, parts };
        if !report.is_empty() {
            info!(
                session_id,
                messages = report.messages.len(),
                parts = report.parts.len(),
                "purged orphaned optimistic records"
            );
        }
        report
    }

    fn message_ids(&self, session_id: &str) -> HashSet<String> {
        self.messages
            .get_by_session(session_id)
            .into_iter()
            .map(|m| m.id.into_inner())
            .collect()
    }

    // ── Snapshot ────────────────────────────────────────────────────

    /// Copy every store, sorted by id.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut sessions = self.sessions.all();
        let mut messages = self.messages.all();
        let mut parts = self.parts.all();
        let mut permissions = self.permissions.all();
        let mut questions = self.questions.all();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        parts.sort_by(|a, b| a.id.cmp(&b.id));
        permissions.sort_by(|a, b| a.id.cmp(&b.id));
        questions.sort_by(|a, b| a.id.cmp(&b.id));
        GraphSnapshot {
            sessions,
            messages,
            parts,
            permissions,
            questions,
        }
    }
}

fn belongs_to(part: &Part, session_id: &str, message_ids: &HashSet<String>) -> bool {
    part.session_id.as_deref() == Some(session_id) || message_ids.contains(part.message_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use assert_matches::assert_matches;
    use tether_core::{ManualClock, ToolState, ToolStatus};

    use crate::reconcile::MatchStrategy;

    fn graph() -> (StoreGraph, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let graph = StoreGraph::builder()
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build();
        let _ = graph.sessions().upsert(Session::new("s1", "/w")).unwrap();
        (graph, clock)
    }

    #[test]
    fn validators_reject_dangling_references() {
        let (graph, _) = graph();
        assert_matches!(
            graph.messages().upsert(Message::user("m1", "s9", 0)),
            Err(ValidationError::MissingSession { .. })
        );
        assert_matches!(
            graph.commit_part(Part::text("p1", "m9", "x")),
            Err(ValidationError::MissingMessage { .. })
        );
    }

    #[test]
    fn reporting_policy_never_raises() {
        let graph = StoreGraph::builder()
            .validation_policy(ValidationPolicy::Report(Arc::new(|_: &ValidationError| {})))
            .build();
        assert_eq!(
            graph.messages().upsert(Message::user("m1", "s9", 0)).unwrap(),
            UpsertOutcome::Rejected
        );
        assert_eq!(
            graph.commit_message(Message::user("m1", "s9", 0)).unwrap(),
            CommitOutcome::Rejected
        );
    }

    #[test]
    fn removing_session_cascades_everything() {
        let (graph, _) = graph();
        let _ = graph.messages().upsert(Message::user("m1", "s1", 0)).unwrap();
        let _ = graph.parts().upsert(Part::text("p1", "m1", "x")).unwrap();
        let _ = graph
            .permissions()
            .upsert(PermissionRequest {
                id: "perm-1".into(),
                session_id: "s1".into(),
                message_id: None,
                call_id: None,
                tool_name: "bash".into(),
                args: serde_json::Value::Null,
            })
            .unwrap();

        assert!(graph.sessions().remove("s1").is_some());
        assert!(graph.messages().is_empty());
        assert!(graph.parts().is_empty());
        assert!(graph.permissions().is_empty());
    }

    #[test]
    fn removing_message_cascades_parts_only() {
        let (graph, _) = graph();
        let _ = graph.messages().upsert(Message::user("m1", "s1", 0)).unwrap();
        let _ = graph.messages().upsert(Message::user("m2", "s1", 0)).unwrap();
        let _ = graph.parts().upsert(Part::text("p1", "m1", "x")).unwrap();
        let _ = graph.parts().upsert(Part::text("p2", "m2", "y")).unwrap();

        let _ = graph.messages().remove("m1");
        assert!(graph.parts().get_by_message("m1").is_empty());
        assert_eq!(graph.parts().get_by_message("m2").len(), 1);
        assert!(graph.sessions().contains("s1"));
    }

    #[test]
    fn id_change_moves_parts_without_cascade() {
        let (graph, _) = graph();
        let _ = graph
            .stage_message(Message::user("opt-u1", "s1", 1), OptimisticSource::Local)
            .unwrap();
        let _ = graph
            .stage_part(Part::text("opt-p1", "opt-u1", "hello"), OptimisticSource::Local)
            .unwrap();

        let outcome = graph.commit_message(Message::user("u1", "s1", 2)).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Reconciled {
                replaced: "opt-u1".into(),
                strategy: MatchStrategy::ParentWindowRole,
            }
        );
        let parts = graph.parts().get_by_message("u1");
        assert_eq!(parts.len(), 1);
        assert!(parts[0].optimistic.as_ref().unwrap().correlation_key.starts_with("part:u1:"));
        assert!(graph.parts().get_by_message("opt-u1").is_empty());
    }

    #[test]
    fn swept_message_takes_its_parts() {
        let (graph, clock) = graph();
        let _ = graph
            .stage_message(Message::user("opt-u1", "s1", 7), OptimisticSource::Local)
            .unwrap();
        let _ = graph
            .stage_part(Part::text("opt-p1", "opt-u1", "hi"), OptimisticSource::Local)
            .unwrap();
        clock.advance(30_001);

        let outcome = graph.commit_message(Message::user("u1", "s1", 7)).unwrap();
        assert_eq!(outcome, CommitOutcome::Inserted);
        assert_eq!(graph.messages().ids(), ["u1"]);
        assert!(graph.parts().is_empty());
        assert!(!graph.has_optimistic("s1"));
    }

    #[test]
    fn readers_never_see_parts_of_a_replaced_message() {
        const ROUNDS: i64 = 200;
        let (graph, _) = graph();
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    for round in 0..ROUNDS {
                        let old = format!("opt-{round}");
                        if !graph.messages().contains(&old) {
                            assert!(graph.parts().get_by_message(&old).is_empty(), "{old} left parts behind");
                        }
                    }
                }
            });
            for round in 0..ROUNDS {
                let old = format!("opt-{round}");
                let _ = graph
                    .stage_message(Message::user(old.as_str(), "s1", round), OptimisticSource::Local)
                    .unwrap();
                let _ = graph
                    .stage_part(Part::text(format!("p-{round}"), old.as_str(), "x"), OptimisticSource::Local)
                    .unwrap();
                let outcome = graph
                    .commit_message(Message::user(format!("u-{round}"), "s1", round))
                    .unwrap();
                assert_eq!(outcome.id_change(&format!("u-{round}")), Some(old.as_str()));
            }
            done.store(true, Ordering::Release);
            reader.join().unwrap();
        });
        assert_eq!(graph.parts().len(), 200);
        assert!(graph.parts().find(|p| p.message_id.starts_with("opt-")).is_empty());
    }

    #[test]
    fn window_expiry_prevents_match() {
        let (graph, clock) = graph();
        let _ = graph
            .stage_message(Message::user("opt-u1", "s1", 1), OptimisticSource::Local)
            .unwrap();
        clock.advance(30_001);
        let outcome = graph.commit_message(Message::user("u1", "s1", 2)).unwrap();
        assert_eq!(outcome, CommitOutcome::Inserted);
        assert!(graph.has_optimistic("s1"));
    }

    #[test]
    fn purge_drops_only_optimistic() {
        let (graph, _) = graph();
        let _ = graph.messages().upsert(Message::user("u1", "s1", 0)).unwrap();
        let _ = graph.parts().upsert(Part::text("p1", "u1", "kept")).unwrap();
        let _ = graph
            .stage_part(
                Part::tool("opt-t", "u1", "bash", "c1", ToolState::new(ToolStatus::Running)),
                OptimisticSource::Stream,
            )
            .unwrap();
        let _ = graph
            .stage_message(Message::assistant("opt-a", "s1", "u1", 1), OptimisticSource::Local)
            .unwrap();

        let report = graph.purge_orphans("s1");
        assert_eq!(report.messages, vec![MessageId::from("opt-a")]);
        assert_eq!(report.parts, vec![PartId::from("opt-t")]);
        assert!(graph.parts().contains("p1"));
        assert!(graph.messages().contains("u1"));
        assert!(!graph.has_optimistic("s1"));
        assert!(graph.purge_orphans("s1").is_empty());
    }

    #[tokio::test]
    async fn mutations_are_published() {
        let (graph, _) = graph();
        let mut rx = graph.subscribe();
        let _ = graph
            .stage_part(Part::text("opt", "missing", "x"), OptimisticSource::Local)
            .unwrap_err();
        let _ = graph.messages().upsert(Message::user("u1", "s1", 0)).unwrap();
        let _ = graph
            .stage_part(Part::text("opt", "u1", "x"), OptimisticSource::Local)
            .unwrap();
        let _ = graph.commit_part(Part::text("p1", "u1", "xy")).unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            StoreMutation::Upserted {
                kind: crate::EntityKind::Message,
                id: "u1".into()
            }
        );
        assert_matches!(rx.recv().await.unwrap(), StoreMutation::Upserted { .. });
        assert_matches!(
            rx.recv().await.unwrap(),
            StoreMutation::Reconciled { strategy: MatchStrategy::MessageType, .. }
        );
    }

    #[test]
    fn snapshot_is_sorted_and_serializable() {
        let (graph, _) = graph();
        let _ = graph.sessions().upsert(Session::new("s0", "/z")).unwrap();
        let _ = graph.messages().upsert(Message::user("m2", "s1", 0)).unwrap();
        let _ = graph.messages().upsert(Message::user("m1", "s1", 0)).unwrap();

        let snapshot = graph.snapshot();
        let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
        assert_eq!(snapshot.sessions[0].id, "s0");

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["messages"][0]["sessionID"], "s1");
    }

    #[test]
    fn dropping_graph_releases_stores() {
        let (graph, _) = graph();
        let weak = Arc::downgrade(&graph.parts);
        drop(graph);
        assert!(weak.upgrade().is_none());
    }
}
