//! The live connection.
//!
//! One event-loop task owns the transport and the [`Pipeline`]. It feeds
//! inbound bytes through the stages and serves write commands from any
//! number of [`Channel`] handles, acknowledging each write only after the
//! encoded bytes are flushed. The close reason is published once, through a
//! `watch` channel, when the loop ends.

use std::fmt;
use std::net::SocketAddr;

use bytes::BytesMut;
use probe_core::{Event, Message, Pipeline};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::connect::BoxedTransport;
use crate::errors::ChannelError;

const READ_BUFFER: usize = 8 * 1024;
const COMMAND_QUEUE: usize = 16;

/// Why the connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side.
    Peer,
    /// Closed from this side.
    Local,
    /// An I/O or framing error ended the connection.
    Error(String),
}

impl CloseReason {
    /// Whether the connection ended because of a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer => f.write_str("closed by peer"),
            Self::Local => f.write_str("closed locally"),
            Self::Error(err) => write!(f, "closed on error: {err}"),
        }
    }
}

enum Command {
    Write {
        message: Message,
        done: oneshot::Sender<Result<(), ChannelError>>,
    },
    Close,
}

/// Handle to the connection driven by the event loop.
#[derive(Clone, Debug)]
pub struct Channel {
    commands: mpsc::Sender<Command>,
    closed: watch::Receiver<Option<CloseReason>>,
    peer: SocketAddr,
}

impl Channel {
    /// Start the event loop for `transport` on `handle`.
    ///
    /// The returned task resolves to the close reason once the transport
    /// has been shut down.
    pub fn spawn(
        handle: &Handle,
        transport: BoxedTransport,
        pipeline: Pipeline,
        peer: SocketAddr,
    ) -> (Self, JoinHandle<CloseReason>) {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let (closed_tx, closed) = watch::channel(None);
        let span = info_span!("channel", %peer);
        let task = handle.spawn(event_loop(transport, pipeline, rx, closed_tx).instrument(span));
        (
            Self {
                commands,
                closed,
                peer,
            },
            task,
        )
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the event loop is still running.
    pub fn is_open(&self) -> bool {
        self.closed.borrow().is_none()
    }

    /// Close reason, once the connection has ended.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.borrow().clone()
    }

    /// Encode `message` through the pipeline, write it, and wait until it
    /// is flushed to the transport.
    pub async fn write_and_flush(&self, message: impl Into<Message>) -> Result<(), ChannelError> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(Command::Write {
                message: message.into(),
                done,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        ack.await.map_err(|_| ChannelError::Closed)?
    }

    /// Ask the event loop to close the connection. Does not wait.
    pub async fn close(&self) {
        // A send failure means the loop has already ended.
        let _ = self.commands.send(Command::Close).await;
    }

    /// Wait until the connection has ended.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.closed.clone();
        let reason = rx.wait_for(Option::is_some).await.map(|r| (*r).clone());
        match reason {
            Ok(Some(reason)) => reason,
            // The loop always publishes before dropping the sender.
            Ok(None) | Err(_) => CloseReason::Error("event loop stopped unexpectedly".into()),
        }
    }
}

async fn event_loop(
    mut transport: BoxedTransport,
    mut pipeline: Pipeline,
    mut commands: mpsc::Receiver<Command>,
    closed: watch::Sender<Option<CloseReason>>,
) -> CloseReason {
    let reason = drive(&mut transport, &mut pipeline, &mut commands).await;

    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::Write { done, .. } = command {
            let _ = done.send(Err(ChannelError::Closed));
        }
    }
    if let Err(err) = transport.shutdown().await {
        debug!(error = %err, "transport shutdown failed");
    }

    if reason.is_error() {
        warn!(%reason, "connection closed");
    } else {
        info!(%reason, "connection closed");
    }
    let _ = closed.send_replace(Some(reason.clone()));
    reason
}

async fn drive(
    transport: &mut BoxedTransport,
    pipeline: &mut Pipeline,
    commands: &mut mpsc::Receiver<Command>,
) -> CloseReason {
    if let Err(err) = pipeline.fire_inbound(Event::Active) {
        return CloseReason::Error(err.to_string());
    }

    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    loop {
        tokio::select! {
            read = transport.read_buf(&mut buf) => match read {
                Ok(0) => return end_of_stream(pipeline),
                // TLS peers that skip close_notify surface as UnexpectedEof.
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!(error = %err, "peer closed without TLS close_notify");
                    return end_of_stream(pipeline);
                }
                Ok(n) => {
                    debug!(bytes = n, "read");
                    let chunk = buf.split().freeze();
                    if let Err(err) = pipeline.fire_inbound(Event::Read(Message::Bytes(chunk))) {
                        return CloseReason::Error(err.to_string());
                    }
                    buf.reserve(READ_BUFFER);
                }
                Err(err) => {
                    let _ = pipeline.fire_inbound(Event::Error(err.to_string()));
                    return CloseReason::Error(err.to_string());
                }
            },
            command = commands.recv() => match command {
                Some(Command::Write { message, done }) => {
                    let result = write(transport, pipeline, message).await;
                    let failure = result.as_ref().err().map(ToString::to_string);
                    let _ = done.send(result);
                    if let Some(err) = failure {
                        return CloseReason::Error(err);
                    }
                }
                Some(Command::Close) | None => return CloseReason::Local,
            },
        }
    }
}

fn end_of_stream(pipeline: &mut Pipeline) -> CloseReason {
    match pipeline.fire_inbound(Event::Inactive) {
        Ok(()) => CloseReason::Peer,
        Err(err) => CloseReason::Error(err.to_string()),
    }
}

async fn write(
    transport: &mut BoxedTransport,
    pipeline: &mut Pipeline,
    message: Message,
) -> Result<(), ChannelError> {
    for chunk in pipeline.write(message)? {
        transport.write_all(&chunk).await?;
    }
    transport.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use probe_core::{HttpCodecStage, HttpRequest};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    #[tokio::test]
    async fn write_is_encoded_and_flushed() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let pipeline = Pipeline::new().with_stage(HttpCodecStage::new());
        let (channel, _task) = Channel::spawn(&Handle::current(), Box::new(local), pipeline, peer());

        channel
            .write_and_flush(HttpRequest::get("/ping", "127.0.0.1:8080"))
            .await
            .unwrap();

        let mut received = vec![0u8; 64];
        let n = remote.read(&mut received).await.unwrap();
        assert_eq!(
            &received[..n],
            b"GET /ping HTTP/1.1\r\nHost: 127.0.0.1:8080\r\n\r\n"
        );
        assert!(channel.is_open());
        assert_eq!(channel.peer(), peer());
    }

    #[tokio::test]
    async fn peer_close_is_published_and_later_writes_fail() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let pipeline = Pipeline::new().with_stage(HttpCodecStage::new());
        let (channel, task) = Channel::spawn(&Handle::current(), Box::new(local), pipeline, peer());

        remote.shutdown().await.unwrap();
        drop(remote);

        assert_eq!(channel.closed().await, CloseReason::Peer);
        assert_eq!(task.await.unwrap(), CloseReason::Peer);
        assert!(!channel.is_open());
        assert_eq!(channel.close_reason(), Some(CloseReason::Peer));

        let err = channel
            .write_and_flush(HttpRequest::get("/", "h"))
            .await
            .unwrap_err();
        assert_matches!(err, ChannelError::Closed);
    }

    #[tokio::test]
    async fn local_close_ends_the_loop() {
        let (local, _remote) = tokio::io::duplex(4096);
        let (channel, task) = Channel::spawn(&Handle::current(), Box::new(local), Pipeline::new(), peer());
        channel.close().await;
        assert_eq!(task.await.unwrap(), CloseReason::Local);
        assert_eq!(channel.closed().await, CloseReason::Local);
    }

    #[tokio::test]
    async fn framing_error_closes_with_error() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let pipeline = Pipeline::new().with_stage(HttpCodecStage::new());
        let (channel, _task) = Channel::spawn(&Handle::current(), Box::new(local), pipeline, peer());

        remote.write_all(b"NOT HTTP AT ALL\r\n\r\n").await.unwrap();
        assert_matches!(channel.closed().await, CloseReason::Error(msg) if msg.contains("malformed"));
    }

    #[tokio::test]
    async fn unencoded_write_fails_the_connection() {
        let (local, _remote) = tokio::io::duplex(4096);
        let (channel, _task) = Channel::spawn(&Handle::current(), Box::new(local), Pipeline::new(), peer());

        let err = channel
            .write_and_flush(HttpRequest::get("/", "h"))
            .await
            .unwrap_err();
        assert_matches!(err, ChannelError::Pipeline(_));
        assert!(channel.closed().await.is_error());
    }
}
