//! # webflo-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WebfloSettings::default()`]
//! 2. **User file**: `~/.webflo/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WEBFLO_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<WebfloSettings> = OnceLock::new();

/// Get the process-wide settings.
///
/// The first call loads from disk and environment; later calls return the
/// cached value. Falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static WebfloSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            WebfloSettings::default()
        })
    })
}

/// Install a specific settings value as the process-wide instance.
///
/// Returns the value back if settings were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WebfloSettings) -> std::result::Result<(), WebfloSettings> {
    SETTINGS.set(settings)
}
