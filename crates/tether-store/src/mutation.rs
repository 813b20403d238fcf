//! Committed-mutation feed.
//!
//! Every committed store mutation is published on a
//! [`tokio::sync::broadcast`] channel so an external persistence layer can
//! follow the graph without reaching into it. Publishing with no subscribers
//! is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::entity::EntityKind;
use crate::reconcile::MatchStrategy;

/// A committed change to the store graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "mutation", rename_all = "camelCase")]
pub enum StoreMutation {
    /// A record was inserted or overwritten.
    Upserted {
        /// Store.
        kind: EntityKind,
        /// Record id.
        id: String,
    },
    /// A record was removed explicitly or by cascade.
    Removed {
        /// Store.
        kind: EntityKind,
        /// Record id.
        id: String,
    },
    /// An optimistic record was replaced by its canonical counterpart.
    Reconciled {
        /// Store.
        kind: EntityKind,
        /// Optimistic id that was replaced.
        from: String,
        /// Canonical id now holding the slot.
        to: String,
        /// Strategy that produced the match.
        strategy: MatchStrategy,
    },
    /// An unmatched optimistic record was dropped as an orphan.
    Purged {
        /// Store.
        kind: EntityKind,
        /// Record id.
        id: String,
    },
}

/// Sending half of the mutation feed.
#[derive(Clone, Debug)]
pub struct MutationSink {
    tx: broadcast::Sender<StoreMutation>,
}

impl MutationSink {
    /// Create a feed buffering up to `capacity` mutations per lagging subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a mutation to current subscribers.
    pub fn publish(&self, mutation: StoreMutation) {
        // No subscribers is fine; persistence is optional.
        let _ = self.tx.send(mutation);
    }

    /// Subscribe to mutations committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreMutation> {
        self.tx.subscribe()
    }
}
