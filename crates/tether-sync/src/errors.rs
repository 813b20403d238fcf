//! Dispatcher errors.

use tether_core::SessionId;
use thiserror::Error;

/// Failure to hand an event to a session worker.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher has been shut down.
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// The session's worker exited before taking the event.
    #[error("worker for session {session_id} stopped")]
    WorkerStopped {
        /// Session the event was addressed to.
        session_id: SessionId,
    },
}

/// Convenience alias for dispatcher results.
pub type Result<T> = std::result::Result<T, DispatchError>;
