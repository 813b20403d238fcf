//! # tether-store
//!
//! Normalized, in-memory entity stores for sessions, messages, parts, and
//! pending permission/question requests.
//!
//! - **[`EntityStore`]**: generic keyed store with an order-preserving
//!   secondary index and injected validator/cascade hooks
//! - **[`StoreGraph`]**: the five stores wired by [`StoreGraphBuilder`];
//!   children are validated against parents, removals cascade downward
//! - **Reconciliation**: canonical commits replace matching optimistic
//!   records via ordered [`MatchStrategy`] rules
//! - **Mutation feed**: every committed change is broadcast as a
//!   [`StoreMutation`]

#![deny(unsafe_code)]

pub mod entity;
pub mod graph;
pub mod mutation;
pub mod reconcile;
pub mod store;
pub mod stores;

pub use entity::{Entity, EntityKind};
pub use graph::{GraphSnapshot, PurgeReport, StoreGraph, StoreGraphBuilder};
pub use mutation::{MutationSink, StoreMutation};
pub use reconcile::{CommitOutcome, MatchContext, MatchDecision, MatchStrategy, Reconcilable};
pub use store::{EntityStore, Result, UpsertOutcome, ValidationPolicy, Validator};
pub use stores::{MessageStore, PartStore, PermissionStore, QuestionStore, SessionStore};
