//! Settings types and defaults.

use std::collections::BTreeMap;
use std::net::IpAddr;

/// Default remote host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default request target.
pub const DEFAULT_URL: &str = "/whatever";
/// Default remote port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default payload size hint.
pub const DEFAULT_SIZE: u32 = 256;

/// Every recognised settings key.
pub const KEYS: [&str; 6] = ["ssl", "host", "url", "port", "size", "wire_log"];

/// Resolved probe configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Wrap the connection in TLS (insecure trust policy).
    pub ssl: bool,
    /// Remote host name or address.
    pub host: String,
    /// Request target sent in every `GET`.
    pub url: String,
    /// Remote TCP port.
    pub port: u16,
    /// Payload size hint. Accepted and validated, not used by request logic.
    pub size: u32,
    /// Add the raw byte hex-dump stage to the pipeline.
    pub wire_log: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ssl: false,
            host: DEFAULT_HOST.to_string(),
            url: DEFAULT_URL.to_string(),
            port: DEFAULT_PORT,
            size: DEFAULT_SIZE,
            wire_log: false,
        }
    }
}

impl ProbeSettings {
    /// `Host` header value: the host, bracketed if it is an IPv6 literal,
    /// with the port unless it is the scheme default.
    pub fn authority(&self) -> String {
        let host = match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]", self.host),
            _ => self.host.clone(),
        };
        let default_port = if self.ssl { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// URL scheme implied by the TLS flag.
    pub fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }
}

/// Raw key/value settings as supplied by one or more layers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    /// Empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every `PROBE_<KEY>` environment variable that is set.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| {
            std::env::var_os(name).map(|v| v.to_string_lossy().into_owned())
        })
    }

    /// Collect properties through `lookup`, called with each env var name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut props = Self::new();
        for key in KEYS {
            if let Some(value) = lookup(&env_var_name(key)) {
                props.set(key, value);
            }
        }
        props
    }

    /// Set `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`Properties::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether `key` is present, whatever its value.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: Properties) {
        self.0.extend(other.0);
    }
}

/// Environment variable carrying `key`.
pub fn env_var_name(key: &str) -> String {
    format!("PROBE_{}", key.to_ascii_uppercase())
}
