//! Settings resolution and validation.
//!
//! `ssl` and `wire_log` are presence flags: any value, even an empty one,
//! turns them on. `port` and `size` must parse; a bad value is an error,
//! never a silent fallback to the default.

use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SIZE, DEFAULT_URL, ProbeSettings, Properties};

/// Resolve settings from the environment with `overrides` (usually the
/// command line) applied on top.
pub fn load_settings(overrides: Properties) -> Result<ProbeSettings> {
    let mut props = Properties::from_env();
    props.merge(overrides);
    resolve(&props)
}

/// Validate a merged property set into [`ProbeSettings`].
pub fn resolve(props: &Properties) -> Result<ProbeSettings> {
    let port = props.get("port").map_or(Ok(DEFAULT_PORT), parse_port)?;
    let size = props.get("size").map_or(Ok(DEFAULT_SIZE), parse_size)?;
    let host = props.get("host").map_or(Ok(DEFAULT_HOST), parse_host)?;
    let url = props.get("url").map_or(Ok(DEFAULT_URL), parse_url)?;

    let settings = ProbeSettings {
        ssl: props.contains("ssl"),
        host: host.to_string(),
        url: url.to_string(),
        port,
        size,
        wire_log: props.contains("wire_log"),
    };
    debug!(?settings, "settings resolved");
    Ok(settings)
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a TCP port in `1..=65535`.
pub fn parse_port(val: &str) -> Result<u16> {
    let n: u32 = val
        .trim()
        .parse()
        .map_err(|_| SettingsError::invalid("port", val, "not an integer"))?;
    u16::try_from(n)
        .ok()
        .filter(|&port| port != 0)
        .ok_or_else(|| SettingsError::invalid("port", val, "must be between 1 and 65535"))
}

/// Parse the payload size hint.
pub fn parse_size(val: &str) -> Result<u32> {
    val.trim()
        .parse()
        .map_err(|_| SettingsError::invalid("size", val, "not a non-negative integer"))
}

fn parse_host(val: &str) -> Result<&str> {
    let host = val.trim();
    if host.is_empty() {
        return Err(SettingsError::invalid("host", val, "must not be empty"));
    }
    Ok(host)
}

fn parse_url(val: &str) -> Result<&str> {
    if val.is_empty() {
        return Err(SettingsError::invalid("url", val, "must not be empty"));
    }
    // Written verbatim into the request line.
    if val.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SettingsError::invalid(
            "url",
            val,
            "must not contain whitespace or control characters",
        ));
    }
    Ok(val)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
