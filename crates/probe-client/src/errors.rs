//! Error types for connecting and running a session.

use std::net::SocketAddr;
use std::time::Duration;

use probe_core::PipelineError;
use thiserror::Error;

use crate::{EXIT_CONNECT, EXIT_SESSION};

/// Failure to establish the connection. Never retried.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Name resolution failed.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        /// Host as configured.
        host: String,
        /// Port as configured.
        port: u16,
        /// Resolver error.
        #[source]
        source: std::io::Error,
    },
    /// Name resolution returned nothing.
    #[error("{host}:{port} resolved to no addresses")]
    NoAddresses {
        /// Host as configured.
        host: String,
        /// Port as configured.
        port: u16,
    },
    /// Socket setup or TCP connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address attempted.
        addr: SocketAddr,
        /// Socket error.
        #[source]
        source: std::io::Error,
    },
    /// TCP connect or TLS handshake did not finish in time.
    #[error("timed out connecting to {addr} after {timeout:?}")]
    Timeout {
        /// Address attempted.
        addr: SocketAddr,
        /// Limit that was hit.
        timeout: Duration,
    },
    /// The host cannot be used as a TLS server name.
    #[error("invalid TLS server name {0:?}")]
    ServerName(String),
    /// The TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),
    /// The TLS handshake failed.
    #[error("TLS handshake with {addr} failed: {source}")]
    Handshake {
        /// Peer address.
        addr: SocketAddr,
        /// Handshake error.
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single channel operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection is already closed.
    #[error("channel is closed")]
    Closed,
    /// Writing to the transport failed.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    /// A pipeline stage rejected the outbound message.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Session-level failure, classified for the process exit code.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The background I/O runtime could not start.
    #[error("failed to start I/O runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(#[from] ConnectError),
    /// Writing a request failed.
    #[error("request {request} failed: {source}")]
    Write {
        /// 1-based request number.
        request: u32,
        /// Underlying channel failure.
        #[source]
        source: ChannelError,
    },
    /// The peer closed the connection before every request was sent.
    #[error("connection closed after {sent} of {planned} requests")]
    ClosedEarly {
        /// Requests written before the close was observed.
        sent: u32,
        /// Requests planned.
        planned: u32,
    },
    /// The connection failed after it was established.
    #[error("connection failed after {sent} requests: {message}")]
    Session {
        /// Requests written before the failure.
        sent: u32,
        /// Failure description.
        message: String,
    },
}

impl ProbeError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Runtime(_) | Self::Connect(_) => EXIT_CONNECT,
            Self::Write { .. } | Self::ClosedEarly { .. } | Self::Session { .. } => EXIT_SESSION,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Runtime(_) => "runtime",
            Self::Connect(ConnectError::Timeout { .. }) => "connect_timeout",
            Self::Connect(ConnectError::Handshake { .. } | ConnectError::TlsConfig(_)) => "tls",
            Self::Connect(_) => "connect",
            Self::Write { .. } => "write",
            Self::ClosedEarly { .. } => "closed_early",
            Self::Session { .. } => "session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> ConnectError {
        ConnectError::Connect {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
    }

    #[test]
    fn connection_failures_exit_with_connect_code() {
        let err = ProbeError::from(refused());
        assert_eq!(err.exit_code(), EXIT_CONNECT);
        assert_eq!(err.error_kind(), "connect");
        assert!(err.to_string().starts_with("connection failed: failed to connect to 127.0.0.1:1"));
    }

    #[test]
    fn mid_session_failures_exit_with_session_code() {
        let early = ProbeError::ClosedEarly { sent: 1, planned: 3 };
        assert_eq!(early.exit_code(), EXIT_SESSION);
        assert_eq!(early.to_string(), "connection closed after 1 of 3 requests");

        let write = ProbeError::Write {
            request: 2,
            source: ChannelError::Closed,
        };
        assert_eq!(write.exit_code(), EXIT_SESSION);
        assert_eq!(write.to_string(), "request 2 failed: channel is closed");
    }

    #[test]
    fn timeout_is_classified_separately() {
        let err = ProbeError::Connect(ConnectError::Timeout {
            addr: "10.0.0.1:80".parse().unwrap(),
            timeout: Duration::from_secs(30),
        });
        assert_eq!(err.error_kind(), "connect_timeout");
        assert_eq!(err.exit_code(), EXIT_CONNECT);
    }
}
