//! # tether-core
//!
//! Foundation types, errors, and utilities for the tether sync core.
//!
//! This crate provides the shared vocabulary the store graph and event router
//! depend on:
//!
//! - **Branded IDs**: `SessionId`, `MessageId`, `PartId`, `EventId`, `RequestId`
//! - **Entities**: `Session`, `Message`, `Part` (tagged `PartBody`), `PermissionRequest`, `QuestionRequest`
//! - **Optimistic metadata**: `OptimisticMetadata` with an always-`true` flag
//! - **Correlation keys**: deterministic keys linking optimistic and canonical records
//! - **Clock**: injectable epoch-millisecond clock (`SystemClock`, `ManualClock`)
//! - **Errors**: `ValidationError` and `RoutingError` via `thiserror`
//! - **Logging**: `tracing` subscriber setup and a capturing layer for tests

#![deny(unsafe_code)]

pub mod clock;
pub mod constants;
pub mod correlation;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;
pub mod optimistic;
pub mod part;
pub mod request;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{RoutingError, ValidationError};
pub use ids::{EventId, MessageId, PartId, RequestId, SessionId};
pub use message::{Message, Role};
pub use optimistic::{OptimisticFlag, OptimisticMetadata, OptimisticSource};
pub use part::{Part, PartBody, PartKind, ToolState, ToolStatus};
pub use request::{PermissionRequest, QuestionRequest};
pub use session::{Session, SessionStatus};
