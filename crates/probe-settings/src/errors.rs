//! Settings error types.

use thiserror::Error;

/// Errors that can occur when resolving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A settings value was present but unusable.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Settings key (`port`, `url`, ...).
        key: &'static str,
        /// Raw value as supplied.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Key whose value was rejected.
    pub fn key(&self) -> &'static str {
        match self {
            Self::InvalidValue { key, .. } => key,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
