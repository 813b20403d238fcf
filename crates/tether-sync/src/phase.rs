//! Router-side lifecycle of a session's stream.

use serde::Serialize;

/// Where a session's stream is in its lifecycle.
///
/// ```text
/// Connecting ──▶ Streaming ──▶ Completing ──▶ Idle
///                    ▲              │
///                    └─busy/retry───┘
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Tracked, no content seen yet.
    #[default]
    Connecting,
    /// Content is flowing.
    Streaming,
    /// Completion seen; grace timer armed.
    Completing,
    /// Grace elapsed; orphans purged.
    Idle,
}

impl SessionPhase {
    /// Label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Completing => "completing",
            Self::Idle => "idle",
        }
    }

    /// Phase after content (a message or part) arrives.
    ///
    /// Content never interrupts a pending grace window; only an explicit
    /// busy/retry status does.
    #[must_use]
    pub fn on_content(self) -> Self {
        match self {
            Self::Connecting | Self::Idle => Self::Streaming,
            other => other,
        }
    }
}
