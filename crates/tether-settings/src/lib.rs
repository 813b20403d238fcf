//! # tether-settings
//!
//! Layered configuration for the tether sync core.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **Settings file**: `~/.tether/settings.json` or `$TETHER_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! Settings are plain values handed to the router and store graph at
//! construction; there is no process-wide settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{LoggingSettings, SyncSettings, TetherSettings};
