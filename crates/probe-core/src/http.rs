//! HTTP/1.1 message types exchanged through the pipeline.

use std::fmt;

use bytes::Bytes;

/// Request method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `HEAD` (response never carries a body)
    Head,
}

impl Method {
    /// Wire token for this method.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version on the status or request line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Version {
    /// `HTTP/1.0`
    Http10,
    /// `HTTP/1.1`
    #[default]
    Http11,
}

impl Version {
    /// Wire token for this version.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list. Names keep their original case; lookups are
/// case-insensitive. Repeated names are kept as separate entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing entries with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any entry named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A complete outbound request. Requests sent by the probe never carry a body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Request target as written on the request line.
    pub target: String,
    /// Protocol version.
    pub version: Version,
    /// Request headers.
    pub headers: Headers,
}

impl HttpRequest {
    /// Request with no headers.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::Http11,
            headers: Headers::new(),
        }
    }

    /// `GET <target> HTTP/1.1` with only the mandatory `Host` header.
    pub fn get(target: impl Into<String>, authority: &str) -> Self {
        Self::new(Method::Get, target).with_header("Host", authority)
    }

    /// Builder-style header append.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Status line and headers of an inbound response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    /// Protocol version from the status line.
    pub version: Version,
    /// Status code.
    pub status: u16,
    /// Reason phrase (may be empty).
    pub reason: String,
    /// Response headers.
    pub headers: Headers,
}

impl ResponseHead {
    /// `1xx` responses precede the final response to the same request.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

/// One inbound piece of a response, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HttpObject {
    /// Status line and headers.
    Head(ResponseHead),
    /// A slice of the body, as it arrived.
    Content(Bytes),
    /// End of the current response. Trailers are only present for chunked bodies.
    Last {
        /// Trailer headers following the terminating chunk.
        trailers: Headers,
    },
}

impl HttpObject {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Head(_) => "head",
            Self::Content(_) => "content",
            Self::Last { .. } => "last",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Length", "12");
        assert_eq!(headers.get("content-length"), Some("12"));
        assert!(headers.contains("CONTENT-LENGTH"));
        assert!(!headers.contains("transfer-encoding"));
    }

    #[test]
    fn repeated_headers_keep_first_for_get() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("set-cookie"), Some("a=1"));
    }

    #[test]
    fn get_request_carries_only_host() {
        let req = HttpRequest::get("/test", "127.0.0.1:8080");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.version, Version::Http11);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.headers.get("host"), Some("127.0.0.1:8080"));
    }

    #[test]
    fn informational_range() {
        let head = |status| ResponseHead {
            version: Version::Http11,
            status,
            reason: String::new(),
            headers: Headers::new(),
        };
        assert!(head(100).is_informational());
        assert!(head(199).is_informational());
        assert!(!head(200).is_informational());
    }
}
