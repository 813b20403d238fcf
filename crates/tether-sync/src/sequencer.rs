//! Per-session deduplication and reordering.
//!
//! Events carry a per-session sequence number. The sequencer releases them
//! strictly in sequence order: an event at the cursor is released
//! immediately together with any buffered successors; an event ahead of the
//! cursor waits in a bounded buffer until the gap fills.

use std::collections::{BTreeMap, HashSet, VecDeque};

use tether_core::{EventId, RoutingError, SessionId};

use crate::event::InboundEvent;

/// Dedup window plus reorder buffer for one session.
#[derive(Debug)]
pub struct SessionSequencer {
    session_id: SessionId,
    cursor: u64,
    seen: HashSet<EventId>,
    seen_order: VecDeque<EventId>,
    dedup_window: usize,
    pending: BTreeMap<u64, InboundEvent>,
    max_buffered: usize,
}

impl SessionSequencer {
    /// Start a sequencer expecting `cursor` next.
    pub fn new(session_id: SessionId, cursor: u64, dedup_window: usize, max_buffered: usize) -> Self {
        Self {
            session_id,
            cursor,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            dedup_window: dedup_window.max(1),
            pending: BTreeMap::new(),
            max_buffered,
        }
    }

    /// Next expected sequence number.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of events waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Admit an event, returning every event now ready in sequence order.
    ///
    /// An empty vector means the event was buffered.
    pub fn admit(&mut self, event: InboundEvent) -> Result<Vec<InboundEvent>, RoutingError> {
        if self.is_duplicate(&event) {
            return Err(RoutingError::Duplicate {
                event_id: event.event_id,
            });
        }
        if event.sequence < self.cursor {
            return Err(RoutingError::StaleSequence {
                session_id: self.session_id.clone(),
                sequence: event.sequence,
                cursor: self.cursor,
            });
        }
        if event.sequence > self.cursor {
            if self.pending.len() >= self.max_buffered {
                return Err(RoutingError::BufferFull {
                    session_id: self.session_id.clone(),
                    sequence: event.sequence,
                });
            }
            let _ = self.pending.insert(event.sequence, event);
            return Ok(Vec::new());
        }

        let mut ready = vec![self.release(event)];
        while let Some(next) = self.pending.remove(&self.cursor) {
            ready.push(self.release(next));
        }
        Ok(ready)
    }

    fn is_duplicate(&self, event: &InboundEvent) -> bool {
        self.seen.contains(&event.event_id)
            || self.pending.contains_key(&event.sequence)
            || self.pending.values().any(|p| p.event_id == event.event_id)
    }

    fn release(&mut self, event: InboundEvent) -> InboundEvent {
        self.cursor = event.sequence + 1;
        if self.seen.insert(event.event_id.clone()) {
            self.seen_order.push_back(event.event_id.clone());
        }
        while self.seen_order.len() > self.dedup_window {
            if let Some(evicted) = self.seen_order.pop_front() {
                let _ = self.seen.remove(&evicted);
            }
        }
        event
    }
}
