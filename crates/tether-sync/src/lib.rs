//! # tether-sync
//!
//! Turns the server's per-session event stream into store mutations.
//!
//! - **[`InboundEvent`] / [`EventKind`]**: wire envelope and the closed union
//!   of event kinds it decodes into
//! - **[`SessionSequencer`]**: per-session dedup and reordering by sequence
//! - **[`EventRouter`]**: applies released events to a
//!   [`StoreGraph`](tether_store::StoreGraph), triggering reconciliation on
//!   canonical commits and arming [`GraceTimers`] on completion
//! - **[`SessionDispatcher`]**: one tokio worker per session
//! - **[`SyncObserver`]**: callbacks for rejected, reconciled, and purged
//!   records

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod observer;
pub mod phase;
pub mod router;
pub mod sequencer;
pub mod timers;

pub use dispatcher::SessionDispatcher;
pub use errors::{DispatchError, Result};
pub use event::{EventKind, InboundEvent};
pub use observer::{LoggingObserver, Observed, Reconciliation, RecordingObserver, SyncObserver};
pub use phase::SessionPhase;
pub use router::{EventRouter, graph_from_settings};
pub use sequencer::SessionSequencer;
pub use timers::GraceTimers;
