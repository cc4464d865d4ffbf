//! # probe-settings
//!
//! Configuration for the probe client.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`ProbeSettings::default()`]
//! 2. **Environment variables**: `PROBE_*`
//! 3. **Command-line flags** (highest priority)
//!
//! Every layer is first collected into a [`Properties`] set of raw string
//! values; [`resolve`] then validates the merged set in one place, so a bad
//! value fails the same way whichever layer it came from.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, parse_port, parse_size, resolve};
pub use types::*;
