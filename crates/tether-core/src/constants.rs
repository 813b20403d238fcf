//! Package-level constants and sync defaults.

/// Current version of tether (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "tether";

/// Delay between stream completion and the orphan purge.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;

/// Maximum distance between an optimistic timestamp and canonical arrival for
/// correlation-based message matching.
pub const DEFAULT_CORRELATION_WINDOW_MS: i64 = 30_000;

/// Out-of-order events held per session before new arrivals are dropped.
pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 256;

/// Processed event ids remembered per session for deduplication.
pub const DEFAULT_DEDUP_WINDOW: usize = 4_096;

/// Deleted session ids remembered so late events for them are dropped.
pub const DELETED_SESSION_MEMORY: usize = 1_024;
