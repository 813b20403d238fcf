//! Matching canonical records against optimistic ones.
//!
//! Strategies are tried in a fixed order per record type; the first that
//! yields a candidate wins. Exact id always comes first.
//!
//! | Record  | Strategy order                                                    |
//! |---------|-------------------------------------------------------------------|
//! | Message | `exact-id`, `parent-window-role`                                  |
//! | Part    | `exact-id`, then the strategy for the part's body:                |
//! |         | `message-callid` (tool), `message-reasoningid` (reasoning),       |
//! |         | `message-permissionid` (permission), `message-questionid`         |
//! |         | (question) or `message-type` (text)                               |
//!
//! When a strategy finds more than one candidate the earliest-inserted one
//! is kept and the ambiguity is logged.

use serde::Serialize;
use tether_core::{Message, Part, PartBody};
use tracing::warn;

use crate::entity::Entity;

/// How a canonical record was paired with an optimistic one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MatchStrategy {
    /// Both records carry the same id.
    #[serde(rename = "exact-id")]
    ExactId,
    /// Same role and parent, optimistic record created within the window.
    #[serde(rename = "parent-window-role")]
    ParentWindowRole,
    /// Tool parts of the same message sharing a call id.
    #[serde(rename = "message-callid")]
    MessageCallId,
    /// Reasoning parts of the same message sharing a reasoning id.
    #[serde(rename = "message-reasoningid")]
    MessageReasoningId,
    /// Permission parts of the same message sharing a permission id.
    #[serde(rename = "message-permissionid")]
    MessagePermissionId,
    /// Question parts of the same message sharing a question id.
    #[serde(rename = "message-questionid")]
    MessageQuestionId,
    /// Text parts of the same message.
    #[serde(rename = "message-type")]
    MessageType,
}

impl MatchStrategy {
    /// Wire name, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExactId => "exact-id",
            Self::ParentWindowRole => "parent-window-role",
            Self::MessageCallId => "message-callid",
            Self::MessageReasoningId => "message-reasoningid",
            Self::MessagePermissionId => "message-permissionid",
            Self::MessageQuestionId => "message-questionid",
            Self::MessageType => "message-type",
        }
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that are not part of either record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchContext {
    /// Current time in epoch milliseconds.
    pub now_ms: i64,
    /// Correlation window for time-bounded strategies.
    pub window_ms: i64,
}

/// A chosen optimistic record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchDecision {
    /// Id of the optimistic record to replace.
    pub optimistic_id: String,
    /// Strategy that selected it.
    pub strategy: MatchStrategy,
    /// Other candidates the same strategy also accepted.
    pub competing: usize,
}

/// Result of committing a canonical record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No optimistic counterpart; inserted as new.
    Inserted,
    /// Overwrote an existing canonical record.
    Updated,
    /// Replaced an optimistic record.
    Reconciled {
        /// Id of the optimistic record that was replaced.
        replaced: String,
        /// Strategy that produced the match.
        strategy: MatchStrategy,
    },
    /// Failed validation under a reporting policy.
    Rejected,
}

impl CommitOutcome {
    /// The optimistic id replaced by a different canonical id, if any.
    pub fn id_change<'a>(&'a self, canonical_id: &str) -> Option<&'a str> {
        match self {
            Self::Reconciled { replaced, .. } if replaced != canonical_id => Some(replaced),
            _ => None,
        }
    }
}

/// Record types with a canonical-to-optimistic matching rule.
pub trait Reconcilable: Entity {
    /// Pick the optimistic record this canonical record replaces.
    ///
    /// `candidates` are optimistic records in insertion order.
    fn find_match(&self, candidates: &[&Self], ctx: &MatchContext) -> Option<MatchDecision>;

    /// Correlation key this record would carry if it were optimistic.
    fn derived_key(&self) -> String;

    /// Follow a parent whose id changed during reconciliation.
    ///
    /// Returns whether the record was rewritten. Only optimistic records
    /// are ever rewritten.
    fn repoint(&mut self, _old_parent: &str, _new_parent: &str) -> bool {
        false
    }
}

impl Reconcilable for Message {
    fn find_match(&self, candidates: &[&Self], ctx: &MatchContext) -> Option<MatchDecision> {
        exact_id(self.id.as_str(), candidates).or_else(|| {
            pick(candidates, MatchStrategy::ParentWindowRole, |c| {
                c.role == self.role
                    && c.session_id == self.session_id
                    && c.parent_id == self.parent_id
                    && c
                        .optimistic
                        .as_ref()
                        .is_some_and(|m| m.within_window(ctx.now_ms, ctx.window_ms))
            })
        })
    }

    fn derived_key(&self) -> String {
        self.correlation_key()
    }

    fn repoint(&mut self, old_parent: &str, new_parent: &str) -> bool {
        if !self.is_optimistic() || self.parent_id.as_deref() != Some(old_parent) {
            return false;
        }
        self.set_parent(new_parent.into());
        true
    }
}

impl Reconcilable for Part {
    fn find_match(&self, candidates: &[&Self], _ctx: &MatchContext) -> Option<MatchDecision> {
        if let Some(decision) = exact_id(self.id.as_str(), candidates) {
            return Some(decision);
        }
        let same_message = |c: &Part| c.message_id == self.message_id;
        match &self.body {
            PartBody::Tool { call_id, .. } => pick(candidates, MatchStrategy::MessageCallId, |c| {
                same_message(c)
                    && matches!(&c.body, PartBody::Tool { call_id: other, .. } if other == call_id)
            }),
            PartBody::Reasoning { reasoning_id, .. } => {
                pick(candidates, MatchStrategy::MessageReasoningId, |c| {
                    same_message(c)
                        && matches!(
                            &c.body,
                            PartBody::Reasoning { reasoning_id: other, .. } if other == reasoning_id
                        )
                })
            }
            PartBody::Text { .. } => pick(candidates, MatchStrategy::MessageType, |c| {
                same_message(c) && matches!(c.body, PartBody::Text { .. })
            }),
            PartBody::Permission { permission_id, .. } => {
                pick(candidates, MatchStrategy::MessagePermissionId, |c| {
                    same_message(c)
                        && matches!(
                            &c.body,
                            PartBody::Permission { permission_id: other, .. } if other == permission_id
                        )
                })
            }
            PartBody::Question { question_id, .. } => {
                pick(candidates, MatchStrategy::MessageQuestionId, |c| {
                    same_message(c)
                        && matches!(
                            &c.body,
                            PartBody::Question { question_id: other, .. } if other == question_id
                        )
                })
            }
        }
    }

    fn derived_key(&self) -> String {
        self.correlation_key()
    }
}

fn exact_id<E: Entity>(id: &str, candidates: &[&E]) -> Option<MatchDecision> {
    candidates.iter().find(|c| c.id() == id).map(|c| MatchDecision {
        optimistic_id: c.id().to_owned(),
        strategy: MatchStrategy::ExactId,
        competing: 0,
    })
}

fn pick<E: Entity>(
    candidates: &[&E],
    strategy: MatchStrategy,
    accept: impl Fn(&E) -> bool,
) -> Option<MatchDecision> {
    let mut accepted = candidates.iter().filter(|c| accept(c));
    let chosen = accepted.next()?;
    let competing = accepted.count();
    if competing > 0 {
        warn!(
            kind = E::KIND.as_str(),
            strategy = strategy.as_str(),
            chosen = chosen.id(),
            competing,
            "ambiguous reconciliation, keeping earliest candidate"
        );
    }
    Some(MatchDecision {
        optimistic_id: chosen.id().to_owned(),
        strategy,
        competing,
    })
}
