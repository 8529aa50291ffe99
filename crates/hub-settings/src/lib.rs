//! # hub-settings
//!
//! Configuration for the Analytics Hub realtime gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: `~/.analytics-hub/realtime.json`, or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `HUB_*` overrides (highest priority)
//!
//! The binary applies CLI flags on top of the result. Unlike a process-wide
//! singleton, the loaded [`HubSettings`] value is passed explicitly to
//! whatever needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_dir, settings_path};
pub use types::*;
