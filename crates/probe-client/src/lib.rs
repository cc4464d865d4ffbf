//! # probe-client
//!
//! Runs one probe session: connect (optionally over TLS with an insecure
//! trust policy), send a fixed number of `GET` requests on a timer, log
//! every response piece, and wait for the connection to close.
//!
//! The connection is driven by a background `tokio` runtime. The calling
//! thread only submits writes, sleeps between them, and waits for the close
//! signal, so [`run_probe`] is a plain blocking function.

#![deny(unsafe_code)]

pub mod channel;
pub mod connect;
pub mod errors;
pub mod logger;
pub mod session;
pub mod tls;

pub use channel::{Channel, CloseReason};
pub use connect::{BoxedTransport, CONNECT_TIMEOUT, Connected, Transport, connect};
pub use errors::{ChannelError, ConnectError, ProbeError};
pub use logger::{ResponseLogger, ResponseStats};
pub use session::{
    IoRuntime, Outcome, REQUEST_COUNT, REQUEST_INTERVAL, RequestPlan, SessionReport,
    build_pipeline, run_probe,
};

/// Clean close after every planned request.
pub const EXIT_OK: u8 = 0;
/// Connection could not be established (or the I/O runtime could not start).
pub const EXIT_CONNECT: u8 = 1;
/// Invalid configuration; nothing was attempted.
pub const EXIT_CONFIG: u8 = 2;
/// The session failed after connecting.
pub const EXIT_SESSION: u8 = 3;
/// Interrupted while waiting for the connection to close.
pub const EXIT_INTERRUPTED: u8 = 130;
