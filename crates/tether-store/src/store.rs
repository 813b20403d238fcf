//! Generic keyed entity store.
//!
//! An [`EntityStore`] holds one record type under a `parking_lot::RwLock`,
//! with an optional order-preserving secondary index. Relationship
//! behavior is injected once at construction time by the graph builder:
//!
//! - a **validator** checking the record's foreign key against a parent store
//!   (held through a `Weak`, so child stores never keep parents alive)
//! - a **cascade** run after a record is removed (holding children strongly)
//! - a **sink** receiving every committed [`StoreMutation`]
//!
//! ## Locking
//!
//! A store may read its parent's lock while holding its own write lock
//! (validation), never the other way round. Cascades always run after the
//! store's own lock is released. A cross-store rewrite that must not be
//! observed half-applied holds the child's write lock through
//! `EntityStore::locked` and commits into the parent from inside it, so
//! locks are always taken child first: parts, then messages, then sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use metrics::counter;
use parking_lot::{RwLock, RwLockWriteGuard};
use tether_core::ValidationError;
use tracing::{debug, warn};

use crate::entity::Entity;
use crate::mutation::{MutationSink, StoreMutation};
use crate::reconcile::{CommitOutcome, MatchContext, Reconcilable};

/// Result type for store writes.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// What happens when an upsert fails foreign-key validation.
#[derive(Clone, Default)]
pub enum ValidationPolicy {
    /// Return the error to the caller.
    #[default]
    Raise,
    /// Hand the error to a callback and report [`UpsertOutcome::Rejected`].
    Report(Arc<dyn Fn(&ValidationError) + Send + Sync>),
}

impl fmt::Debug for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raise => f.write_str("Raise"),
            Self::Report(_) => f.write_str("Report(..)"),
        }
    }
}

/// Result of a successful upsert call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was stored.
    Inserted,
    /// An existing record was overwritten.
    Updated,
    /// Validation failed under [`ValidationPolicy::Report`].
    Rejected,
}

/// Foreign-key check bound to a parent store.
pub struct Validator<E> {
    exists: Box<dyn Fn(&str) -> bool + Send + Sync>,
    error: fn(&E) -> ValidationError,
}

impl<E> Validator<E> {
    /// Build a validator from an existence predicate and an error constructor.
    pub fn new(
        exists: impl Fn(&str) -> bool + Send + Sync + 'static,
        error: fn(&E) -> ValidationError,
    ) -> Self {
        Self {
            exists: Box::new(exists),
            error,
        }
    }
}

type Cascade<E> = Box<dyn Fn(&E) + Send + Sync>;

struct StoreState<E> {
    entities: HashMap<String, E>,
    index: HashMap<String, Vec<String>>,
}

impl<E: Entity> StoreState<E> {
    fn put(&mut self, entity: E) -> UpsertOutcome {
        let id = entity.id().to_owned();
        let key = entity.index_key().map(str::to_owned);
        match self.entities.insert(id.clone(), entity) {
            Some(previous) => {
                if previous.index_key() != key.as_deref() {
                    self.unindex(previous.index_key(), &id);
                    self.reindex(key, id);
                }
                UpsertOutcome::Updated
            }
            None => {
                self.reindex(key, id);
                UpsertOutcome::Inserted
            }
        }
    }

    fn take(&mut self, id: &str) -> Option<E> {
        let removed = self.entities.remove(id)?;
        self.unindex(removed.index_key(), id);
        Some(removed)
    }

    fn reindex(&mut self, key: Option<String>, id: String) {
        if let Some(key) = key {
            let slot = self.index.entry(key).or_default();
            if !slot.contains(&id) {
                slot.push(id);
            }
        }
    }

    fn unindex(&mut self, key: Option<&str>, id: &str) {
        let Some(key) = key else { return };
        if let Some(slot) = self.index.get_mut(key) {
            slot.retain(|existing| existing != id);
            if slot.is_empty() {
                let _ = self.index.remove(key);
            }
        }
    }

    fn indexed(&self, key: &str) -> impl Iterator<Item = &E> {
        self.index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entities.get(id))
    }
}

/// Keyed store for one record type.
pub struct EntityStore<E: Entity> {
    state: RwLock<StoreState<E>>,
    policy: ValidationPolicy,
    validator: OnceLock<Validator<E>>,
    cascade: OnceLock<Cascade<E>>,
    sink: OnceLock<MutationSink>,
}

impl<E: Entity> Default for EntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> fmt::Debug for EntityStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("kind", &E::KIND)
            .field("len", &self.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> EntityStore<E> {
    /// Standalone store that raises validation errors and has no validator.
    pub fn new() -> Self {
        Self::with_policy(ValidationPolicy::Raise)
    }

    /// Standalone store with the given validation policy.
    pub fn with_policy(policy: ValidationPolicy) -> Self {
        Self {
            state: RwLock::new(StoreState {
                entities: HashMap::new(),
                index: HashMap::new(),
            }),
            policy,
            validator: OnceLock::new(),
            cascade: OnceLock::new(),
            sink: OnceLock::new(),
        }
    }

    /// Standalone store checking foreign keys with `validator`.
    pub fn with_validator(validator: Validator<E>, policy: ValidationPolicy) -> Self {
        let store = Self::with_policy(policy);
        let _ = store.validator.set(validator);
        store
    }

    // ── Wiring (graph builder only) ─────────────────────────────────

    pub(crate) fn wire_validator(&self, validator: Validator<E>) {
        let _ = self.validator.set(validator);
    }

    pub(crate) fn wire_cascade(&self, cascade: impl Fn(&E) + Send + Sync + 'static) {
        let _ = self.cascade.set(Box::new(cascade));
    }

    pub(crate) fn wire_sink(&self, sink: MutationSink) {
        let _ = self.sink.set(sink);
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Clone of the record with `id`.
    pub fn get(&self, id: &str) -> Option<E> {
        self.state.read().entities.get(id).cloned()
    }

    /// Whether a record with `id` exists.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().entities.contains_key(id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record id, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.state.read().entities.keys().cloned().collect()
    }

    /// Clones of every record, in no particular order.
    pub fn all(&self) -> Vec<E> {
        self.state.read().entities.values().cloned().collect()
    }

    /// Records under a secondary-index key, in first-insertion order.
    pub fn get_by_index(&self, key: &str) -> Vec<E> {
        self.state.read().indexed(key).cloned().collect()
    }

    /// Optimistic records under a secondary-index key, in insertion order.
    pub fn optimistic_in(&self, key: &str) -> Vec<E> {
        self.state
            .read()
            .indexed(key)
            .filter(|e| e.optimistic().is_some())
            .cloned()
            .collect()
    }

    /// Records matching `predicate`, in no particular order.
    pub fn find(&self, predicate: impl Fn(&E) -> bool) -> Vec<E> {
        self.state
            .read()
            .entities
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Insert or overwrite a record after foreign-key validation.
    pub fn upsert(&self, entity: E) -> Result<UpsertOutcome> {
        let mut state = self.state.write();
        if let Err(err) = self.check_foreign_key(&entity) {
            drop(state);
            return self.reject(err);
        }
        let id = entity.id().to_owned();
        let outcome = state.put(entity);
        drop(state);
        self.publish(StoreMutation::Upserted { kind: E::KIND, id });
        Ok(outcome)
    }

    /// Apply `update` to the record with `id` in place.
    ///
    /// Returns `false` when no such record exists. The update must not
    /// change the record's id or index key.
    pub fn modify(&self, id: &str, update: impl FnOnce(&mut E)) -> bool {
        {
            let mut state = self.state.write();
            let Some(entity) = state.entities.get_mut(id) else {
                return false;
            };
            update(entity);
        }
        self.publish(StoreMutation::Upserted {
            kind: E::KIND,
            id: id.to_owned(),
        });
        true
    }

    /// Remove a record and run the cascade for it.
    pub fn remove(&self, id: &str) -> Option<E> {
        let removed = self.state.write().take(id)?;
        self.finish_removal(&removed, false);
        Some(removed)
    }

    /// Remove every record under a secondary-index key, cascading each.
    pub fn remove_by_index(&self, key: &str) -> Vec<E> {
        let removed: Vec<E> = {
            let mut state = self.state.write();
            let ids = state.index.get(key).cloned().unwrap_or_default();
            ids.iter().filter_map(|id| state.take(id)).collect()
        };
        for entity in &removed {
            self.finish_removal(entity, false);
        }
        removed
    }

    /// Remove an unmatched optimistic record as an orphan.
    ///
    /// Canonical records are left alone and `None` is returned.
    pub fn purge(&self, id: &str) -> Option<E> {
        let removed = {
            let mut state = self.state.write();
            if state.entities.get(id)?.optimistic().is_none() {
                return None;
            }
            state.take(id)?
        };
        self.finish_removal(&removed, true);
        Some(removed)
    }

    /// Run `f` while holding this store's write lock.
    ///
    /// Mutations made through the handle are published, and removals
    /// cascaded, once the lock is released.
    pub(crate) fn locked<R>(&self, f: impl FnOnce(&mut Locked<'_, E>) -> R) -> R {
        let mut handle = Locked {
            state: self.state.write(),
            touched: Vec::new(),
            purged: Vec::new(),
        };
        let result = f(&mut handle);
        let Locked { state, touched, purged } = handle;
        drop(state);
        for id in touched {
            self.publish(StoreMutation::Upserted { kind: E::KIND, id });
        }
        for entity in &purged {
            self.finish_removal(entity, true);
        }
        result
    }

    fn check_foreign_key(&self, entity: &E) -> Result<()> {
        let (Some(validator), Some(key)) = (self.validator.get(), entity.foreign_key()) else {
            return Ok(());
        };
        if (validator.exists)(key) {
            Ok(())
        } else {
            Err((validator.error)(entity))
        }
    }

    fn reject(&self, err: ValidationError) -> Result<UpsertOutcome> {
        warn!(kind = E::KIND.as_str(), error = %err, "rejected write");
        counter!("store_validation_errors_total", "kind" => E::KIND.as_str()).increment(1);
        match &self.policy {
            ValidationPolicy::Raise => Err(err),
            ValidationPolicy::Report(report) => {
                report(&err);
                Ok(UpsertOutcome::Rejected)
            }
        }
    }

    fn finish_removal(&self, entity: &E, purged: bool) {
        let kind = E::KIND;
        let id = entity.id().to_owned();
        self.publish(if purged {
            StoreMutation::Purged { kind, id }
        } else {
            StoreMutation::Removed { kind, id }
        });
        if let Some(cascade) = self.cascade.get() {
            cascade(entity);
        }
    }

    fn publish(&self, mutation: StoreMutation) {
        if let Some(sink) = self.sink.get() {
            sink.publish(mutation);
        }
    }
}

/// Write access to a store held across a multi-store update.
pub(crate) struct Locked<'a, E: Entity> {
    state: RwLockWriteGuard<'a, StoreState<E>>,
    touched: Vec<String>,
    purged: Vec<E>,
}

impl<E: Entity> Locked<'_, E> {
    /// Move every record under `old_key` to `new_key`.
    ///
    /// `rewrite` must set each record's index key to `new_key`. Returns the
    /// number of records moved.
    pub(crate) fn reparent(&mut self, old_key: &str, new_key: &str, rewrite: impl Fn(&mut E)) -> usize {
        let Some(ids) = self.state.index.remove(old_key) else {
            return 0;
        };
        for id in &ids {
            if let Some(entity) = self.state.entities.get_mut(id) {
                rewrite(entity);
            }
        }
        let slot = self.state.index.entry(new_key.to_owned()).or_default();
        for id in &ids {
            if !slot.contains(id) {
                slot.push(id.clone());
            }
        }
        let moved = ids.len();
        self.touched.extend(ids);
        moved
    }

    /// Remove every record under a secondary-index key as orphans.
    pub(crate) fn purge_index(&mut self, key: &str) -> usize {
        let ids = self.state.index.get(key).cloned().unwrap_or_default();
        let before = self.purged.len();
        for id in &ids {
            if let Some(entity) = self.state.take(id) {
                self.purged.push(entity);
            }
        }
        self.purged.len() - before
    }
}

/// Canonical commit with reconciliation.
impl<E: Reconcilable> EntityStore<E> {
    /// Commit a canonical record, replacing a matching optimistic record.
    pub(crate) fn commit_canonical(&self, canonical: E, ctx: &MatchContext) -> Result<CommitOutcome> {
        self.commit_canonical_with(canonical, ctx, |_, _| {})
    }

    /// Commit a canonical record, replacing a matching optimistic record.
    ///
    /// Runs under a single write lock: validation, match selection,
    /// replacement, re-pointing optimistic siblings at a changed id, and the
    /// sweep of optimistic records sharing the canonical key. The sweep
    /// runs whether the commit inserted, updated or reconciled.
    ///
    /// `on_commit` receives the outcome and the swept ids before the lock
    /// is released. Swept records are not cascaded; their children are
    /// left to `on_commit`.
    pub(crate) fn commit_canonical_with(
        &self,
        canonical: E,
        ctx: &MatchContext,
        on_commit: impl FnOnce(&CommitOutcome, &[String]),
    ) -> Result<CommitOutcome> {
        let kind = E::KIND;
        let id = canonical.id().to_owned();
        let mut state = self.state.write();
        if let Err(err) = self.check_foreign_key(&canonical) {
            drop(state);
            return self.reject(err).map(|_| CommitOutcome::Rejected);
        }

        let scope = canonical.index_key().map(str::to_owned);
        let key = canonical.derived_key();
        let already_canonical = state
            .entities
            .get(&id)
            .is_some_and(|existing| existing.optimistic().is_none());
        let decision = if already_canonical {
            None
        } else {
            let mut candidates: Vec<&E> = match scope.as_deref() {
                Some(key) => state.indexed(key).filter(|e| e.optimistic().is_some()).collect(),
                None => Vec::new(),
            };
            if let Some(same_id) = state.entities.get(&id) {
                if !candidates.iter().any(|c| c.id() == id) {
                    candidates.insert(0, same_id);
                }
            }
            canonical.find_match(&candidates, ctx)
        };

        let mut repointed = Vec::new();
        let outcome = match &decision {
            None => match state.put(canonical) {
                UpsertOutcome::Inserted => CommitOutcome::Inserted,
                UpsertOutcome::Updated | UpsertOutcome::Rejected => CommitOutcome::Updated,
            },
            Some(decision) => {
                if decision.optimistic_id != id {
                    let _ = state.take(&decision.optimistic_id);
                }
                let _ = state.put(canonical);
                let changed_scope = scope.as_deref().filter(|_| decision.optimistic_id != id);
                if let Some(scope) = changed_scope {
                    let siblings = state.index.get(scope).cloned().unwrap_or_default();
                    for sibling in siblings {
                        if let Some(entity) = state.entities.get_mut(&sibling) {
                            if entity.repoint(&decision.optimistic_id, &id) {
                                repointed.push(sibling);
                            }
                        }
                    }
                }
                CommitOutcome::Reconciled {
                    replaced: decision.optimistic_id.clone(),
                    strategy: decision.strategy,
                }
            }
        };

        let leftovers: Vec<String> = match scope.as_deref() {
            Some(scope) => state
                .indexed(scope)
                .filter(|e| e.id() != id && e.optimistic().is_some_and(|m| m.correlation_key == key))
                .map(|e| e.id().to_owned())
                .collect(),
            None => Vec::new(),
        };
        let swept: Vec<String> = leftovers
            .into_iter()
            .filter(|sid| state.take(sid).is_some())
            .collect();
        on_commit(&outcome, &swept);
        drop(state);

        match &decision {
            Some(decision) => {
                debug!(
                    kind = kind.as_str(),
                    from = %decision.optimistic_id,
                    to = %id,
                    strategy = decision.strategy.as_str(),
                    "reconciled optimistic record"
                );
                counter!(
                    "reconciliations_total",
                    "kind" => kind.as_str(),
                    "strategy" => decision.strategy.as_str()
                )
                .increment(1);
                self.publish(StoreMutation::Reconciled {
                    kind,
                    from: decision.optimistic_id.clone(),
                    to: id,
                    strategy: decision.strategy,
                });
            }
            None => self.publish(StoreMutation::Upserted { kind, id }),
        }
        for sibling in repointed {
            self.publish(StoreMutation::Upserted { kind, id: sibling });
        }
        if !swept.is_empty() {
            warn!(kind = kind.as_str(), count = swept.len(), %key, "swept duplicate optimistic records");
        }
        for sid in swept {
            self.publish(StoreMutation::Purged { kind, id: sid });
        }
        Ok(outcome)
    }
}
