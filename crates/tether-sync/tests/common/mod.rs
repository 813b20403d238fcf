//! Shared fixtures for router integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use tether_core::{ManualClock, Message, Part};
use tether_settings::SyncSettings;
use tether_store::StoreGraph;
use tether_sync::{EventRouter, InboundEvent, RecordingObserver, graph_from_settings};

pub const SID: &str = "s1";

/// A router over a fresh graph, with a recording observer and manual clock.
pub struct Harness {
    pub router: EventRouter,
    pub observer: Arc<RecordingObserver>,
    pub clock: Arc<ManualClock>,
    next_sequence: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SyncSettings::default())
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let graph = Arc::new(graph_from_settings(&settings, clock.clone()));
        let observer = Arc::new(RecordingObserver::new());
        let router = EventRouter::with_observer(graph, settings, observer.clone());
        Self {
            router,
            observer,
            clock,
            next_sequence: 0,
        }
    }

    pub fn graph(&self) -> &StoreGraph {
        self.router.graph()
    }

    /// Next in-order envelope for the test session.
    pub fn event(&mut self, event_type: &str, properties: Value) -> InboundEvent {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        InboundEvent::new(format!("{SID}-{sequence}"), sequence, event_type, SID, properties)
    }

    /// Route the next in-order event, returning how many events it released.
    pub fn send(&mut self, event_type: &str, properties: Value) -> usize {
        let event = self.event(event_type, properties);
        self.router.route(event).expect("in-order event admitted")
    }

    /// `session.created` followed by the given canonical messages.
    pub fn open(&mut self, messages: &[Message]) {
        let _ = self.send("session.created", session_info());
        for message in messages {
            let _ = self.send("message.updated", message_info(message));
        }
    }
}

pub fn session_info() -> Value {
    json!({"info": {"id": SID, "directory": "/work"}})
}

pub fn message_info(message: &Message) -> Value {
    json!({ "info": message })
}

pub fn part_props(part: &Part) -> Value {
    json!({ "part": part })
}

pub fn idle() -> Value {
    json!({ "sessionID": SID })
}

pub fn part_ids(parts: &[Part]) -> Vec<&str> {
    parts.iter().map(|p| p.id.as_str()).collect()
}

pub fn message_ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}
