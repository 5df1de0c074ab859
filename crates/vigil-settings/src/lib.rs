//! # vigil-settings
//!
//! Layered configuration for the vigil mirror.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`VigilSettings::default()`]
//! 2. **User file** — `~/.vigil/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `VIGIL_*` overrides (highest priority)
//!
//! ```no_run
//! let settings = vigil_settings::load_settings().unwrap_or_default();
//! println!("server: {}", settings.server.url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, load_with_env, settings_path};
pub use types::{LoggingSettings, MirrorSettings, ReconnectSettings, ServerSettings, VigilSettings};
