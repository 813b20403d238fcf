//! Settings types with compiled defaults.
//!
//! Every struct is `#[serde(default)]` so a partial settings file only needs
//! to name the keys it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::constants::{
    DEFAULT_CORRELATION_WINDOW_MS, DEFAULT_DEDUP_WINDOW, DEFAULT_GRACE_PERIOD_MS,
    DEFAULT_MAX_BUFFERED_EVENTS,
};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Event router and reconciliation tuning.
    pub sync: SyncSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()
    }
}

/// Event router and reconciliation tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Delay between stream completion and the orphan purge.
    pub grace_period_ms: u64,
    /// Correlation window for `parent-window-role` message matching.
    pub correlation_window_ms: i64,
    /// Out-of-order events buffered per session.
    pub max_buffered_events: usize,
    /// Processed event ids remembered per session.
    pub dedup_window: usize,
    /// Capacity of each per-session worker channel.
    pub worker_channel_capacity: usize,
    /// Capacity of the store mutation broadcast channel.
    pub mutation_channel_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            correlation_window_ms: DEFAULT_CORRELATION_WINDOW_MS,
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            worker_channel_capacity: 1024,
            mutation_channel_capacity: 1024,
        }
    }
}

impl SyncSettings {
    /// Grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.correlation_window_ms < 0 {
            return Err(SettingsError::InvalidValue(
                "sync.correlationWindowMs must not be negative".into(),
            ));
        }
        let capacities = [
            ("sync.maxBufferedEvents", self.max_buffered_events),
            ("sync.dedupWindow", self.dedup_window),
            ("sync.workerChannelCapacity", self.worker_channel_capacity),
            ("sync.mutationChannelCapacity", self.mutation_channel_capacity),
        ];
        for (key, value) in capacities {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{key} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `"warn"` or `"tether_sync=debug"`.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_constants() {
        let settings = TetherSettings::default();
        assert_eq!(settings.sync.grace_period_ms, 5_000);
        assert_eq!(settings.sync.correlation_window_ms, 30_000);
        assert_eq!(settings.sync.grace_period(), Duration::from_secs(5));
        assert_eq!(settings.logging.level, "warn");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(TetherSettings::default()).unwrap();
        assert_eq!(json["sync"]["gracePeriodMs"], 5_000);
        assert_eq!(json["sync"]["maxBufferedEvents"], 256);
        assert_eq!(json["logging"]["json"], false);
    }

    #[test]
    fn partial_object_fills_defaults() {
        let settings: TetherSettings =
            serde_json::from_value(serde_json::json!({"sync": {"dedupWindow": 8}})).unwrap();
        assert_eq!(settings.sync.dedup_window, 8);
        assert_eq!(settings.sync.grace_period_ms, 5_000);
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let mut settings = TetherSettings::default();
        settings.sync.mutation_channel_capacity = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("mutationChannelCapacity"));
    }

    #[test]
    fn negative_window_is_invalid() {
        let mut settings = TetherSettings::default();
        settings.sync.correlation_window_ms = -1;
        assert!(settings.validate().is_err());
    }
}
