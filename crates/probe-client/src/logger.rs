//! Terminal pipeline stage that logs decoded responses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use probe_core::{Event, Headers, HttpObject, Message, PipelineError, Stage};
use tracing::{info, warn};

/// Counters updated by [`ResponseLogger`], readable from other threads.
#[derive(Clone, Debug, Default)]
pub struct ResponseStats {
    responses: Arc<AtomicU64>,
    body_bytes: Arc<AtomicU64>,
}

impl ResponseStats {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Final (non-1xx) response heads received.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Body bytes received across all responses.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes.load(Ordering::Relaxed)
    }
}

/// Logs every decoded response piece and swallows all events.
#[derive(Debug, Default)]
pub struct ResponseLogger {
    stats: ResponseStats,
}

impl ResponseLogger {
    /// Logger that records into `stats`.
    pub fn new(stats: ResponseStats) -> Self {
        Self { stats }
    }

    fn log_object(&self, object: &HttpObject) {
        match object {
            HttpObject::Head(head) => {
                if !head.is_informational() {
                    let _ = self.stats.responses.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    status = head.status,
                    version = %head.version,
                    reason = %head.reason,
                    headers = %format_headers(&head.headers),
                    "response head"
                );
            }
            HttpObject::Content(chunk) => {
                let _ = self
                    .stats
                    .body_bytes
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                info!(len = chunk.len(), "response content\n{}", String::from_utf8_lossy(chunk));
            }
            HttpObject::Last { trailers } if trailers.is_empty() => {
                info!("response complete");
            }
            HttpObject::Last { trailers } => {
                info!(trailers = %format_headers(trailers), "response complete");
            }
        }
    }
}

impl Stage for ResponseLogger {
    fn name(&self) -> &'static str {
        "response-logger"
    }

    fn inbound(&mut self, event: Event, _out: &mut Vec<Event>) -> Result<(), PipelineError> {
        match event {
            Event::Active => info!("channel active"),
            Event::Read(Message::Response(object)) => self.log_object(&object),
            Event::Read(other) => info!(kind = other.kind(), "unexpected inbound message"),
            Event::Inactive => info!("channel inactive"),
            Event::Error(err) => warn!(error = %err, "channel error"),
        }
        Ok(())
    }
}

fn format_headers(headers: &Headers) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use probe_core::{ResponseHead, Version};

    use super::*;

    fn head(status: u16) -> HttpObject {
        let mut headers = Headers::new();
        headers.append("Content-Length", "5");
        HttpObject::Head(ResponseHead {
            version: Version::Http11,
            status,
            reason: "OK".into(),
            headers,
        })
    }

    #[test]
    fn counts_final_heads_and_body_bytes() {
        let stats = ResponseStats::new();
        let mut logger = ResponseLogger::new(stats.clone());
        let mut out = Vec::new();

        for object in [
            head(100),
            head(200),
            HttpObject::Content(Bytes::from_static(b"hello")),
            HttpObject::Last {
                trailers: Headers::new(),
            },
        ] {
            logger
                .inbound(Event::Read(Message::Response(object)), &mut out)
                .unwrap();
        }

        assert_eq!(stats.responses(), 1);
        assert_eq!(stats.body_bytes(), 5);
        assert!(out.is_empty());
    }

    #[test]
    fn swallows_lifecycle_events() {
        let mut logger = ResponseLogger::default();
        let mut out = Vec::new();
        for event in [
            Event::Active,
            Event::Read(Message::Bytes(Bytes::from_static(b"raw"))),
            Event::Error("boom".into()),
            Event::Inactive,
        ] {
            logger.inbound(event, &mut out).unwrap();
        }
        assert!(out.is_empty());
    }

    #[test]
    fn headers_render_in_order() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        headers.append("X-Probe", "1");
        assert_eq!(format_headers(&headers), "Content-Type: text/plain, X-Probe: 1");
    }
}
