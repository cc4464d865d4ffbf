//! One probe run: connect, send the planned requests, wait for the close.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use probe_core::{HttpCodecStage, HttpRequest, Pipeline, WireLogger};
use probe_settings::ProbeSettings;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, warn};

use crate::channel::{Channel, CloseReason};
use crate::connect::{Connected, connect};
use crate::errors::{ChannelError, ProbeError};
use crate::logger::{ResponseLogger, ResponseStats};
use crate::{EXIT_INTERRUPTED, EXIT_OK};

/// Requests sent per run.
pub const REQUEST_COUNT: u32 = 3;
/// Pause between consecutive requests.
pub const REQUEST_INTERVAL: Duration = Duration::from_secs(5);

const IO_WORKERS: usize = 2;
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(5);

/// How many requests to send and how far apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestPlan {
    /// Number of `GET` requests.
    pub requests: u32,
    /// Blocking sleep between consecutive requests.
    pub interval: Duration,
}

impl Default for RequestPlan {
    fn default() -> Self {
        Self {
            requests: REQUEST_COUNT,
            interval: REQUEST_INTERVAL,
        }
    }
}

/// How the wait for the connection close ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The connection closed on its own.
    Closed(CloseReason),
    /// Ctrl-C arrived first; the connection was closed locally.
    Interrupted,
}

/// Summary of a completed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// Address the session connected to.
    pub peer: SocketAddr,
    /// Requests written and flushed.
    pub requests_sent: u32,
    /// Final response heads received.
    pub responses_received: u64,
    /// Body bytes received.
    pub body_bytes: u64,
    /// How the session ended.
    pub outcome: Outcome,
}

impl SessionReport {
    /// Process exit code for this run.
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            Outcome::Closed(_) => EXIT_OK,
            Outcome::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

/// Background runtime driving the connection while the calling thread
/// blocks. Dropping it cancels the event loop and closes the transport.
#[derive(Debug)]
pub struct IoRuntime {
    runtime: Runtime,
}

impl IoRuntime {
    /// Start the worker threads.
    pub fn new() -> Result<Self, ProbeError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(IO_WORKERS)
            .thread_name("probe-io")
            .enable_all()
            .build()
            .map_err(ProbeError::Runtime)?;
        Ok(Self { runtime })
    }

    /// Run `future` to completion on the calling thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Handle for spawning onto the worker threads.
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Stop the runtime, giving outstanding tasks a bounded grace period.
    pub fn shutdown(self) {
        self.runtime.shutdown_timeout(RUNTIME_SHUTDOWN);
        debug!("I/O runtime stopped");
    }
}

/// Stages for one session: optional wire logger, HTTP codec, response logger.
pub fn build_pipeline(settings: &ProbeSettings, stats: &ResponseStats) -> Pipeline {
    let mut pipeline = Pipeline::new();
    if settings.wire_log {
        pipeline.add_last(WireLogger::new());
    }
    pipeline.add_last(HttpCodecStage::new());
    pipeline.add_last(ResponseLogger::new(stats.clone()));
    debug!(stages = ?pipeline.names(), "pipeline ready");
    pipeline
}

/// Run one probe session to completion. Blocks the calling thread.
///
/// The I/O runtime is shut down before returning, whatever the result.
pub fn run_probe(settings: &ProbeSettings, plan: &RequestPlan) -> Result<SessionReport, ProbeError> {
    let runtime = IoRuntime::new()?;
    let result = run_session(&runtime, settings, plan);
    runtime.shutdown();
    result
}

fn run_session(
    runtime: &IoRuntime,
    settings: &ProbeSettings,
    plan: &RequestPlan,
) -> Result<SessionReport, ProbeError> {
    info!(
        host = %settings.host,
        port = settings.port,
        scheme = settings.scheme(),
        url = %settings.url,
        "connecting"
    );
    let Connected { transport, peer } = runtime.block_on(connect(settings))?;
    info!(%peer, "connected");

    let stats = ResponseStats::new();
    let (channel, event_loop) = Channel::spawn(
        runtime.handle(),
        transport,
        build_pipeline(settings, &stats),
        peer,
    );

    let sent = match send_requests(runtime, &channel, settings, plan) {
        Ok(sent) => sent,
        Err(err) => {
            runtime.block_on(channel.close());
            return Err(err);
        }
    };

    info!("waiting for connection to be closed");
    let outcome = runtime.block_on(wait_for_close(&channel, tokio::signal::ctrl_c()));
    let reason = runtime
        .block_on(event_loop)
        .unwrap_or_else(|err| CloseReason::Error(format!("event loop task failed: {err}")));

    if outcome != Outcome::Interrupted {
        if let CloseReason::Error(message) = reason {
            return Err(ProbeError::Session { sent, message });
        }
    }

    let report = SessionReport {
        peer,
        requests_sent: sent,
        responses_received: stats.responses(),
        body_bytes: stats.body_bytes(),
        outcome,
    };
    info!(
        requests = report.requests_sent,
        responses = report.responses_received,
        body_bytes = report.body_bytes,
        "session finished"
    );
    Ok(report)
}

fn send_requests(
    runtime: &IoRuntime,
    channel: &Channel,
    settings: &ProbeSettings,
    plan: &RequestPlan,
) -> Result<u32, ProbeError> {
    let authority = settings.authority();
    let mut sent = 0;
    for n in 1..=plan.requests {
        if n > 1 {
            std::thread::sleep(plan.interval);
        }
        if let Some(reason) = channel.close_reason() {
            return Err(closed_before(reason, sent, plan.requests));
        }

        let request = HttpRequest::get(settings.url.as_str(), &authority);
        info!(request = n, method = %request.method, target = %request.target, "sending request");
        match runtime.block_on(channel.write_and_flush(request)) {
            Ok(()) => sent = n,
            Err(ChannelError::Closed) => {
                return Err(runtime.block_on(rejected_write(channel, sent, plan.requests)));
            }
            Err(source) => return Err(ProbeError::Write { request: n, source }),
        }
    }
    Ok(sent)
}

/// Classify a write the channel refused. The command queue closes before the
/// close reason is published; this waits for the published reason.
async fn rejected_write(channel: &Channel, sent: u32, planned: u32) -> ProbeError {
    closed_before(channel.closed().await, sent, planned)
}

fn closed_before(reason: CloseReason, sent: u32, planned: u32) -> ProbeError {
    warn!(%reason, sent, planned, "connection closed before all requests were sent");
    match reason {
        CloseReason::Error(message) => ProbeError::Session { sent, message },
        CloseReason::Peer | CloseReason::Local => ProbeError::ClosedEarly { sent, planned },
    }
}

/// Wait for the connection to close, or for `interrupt` to fire first, in
/// which case the connection is closed locally.
async fn wait_for_close<I>(channel: &Channel, interrupt: I) -> Outcome
where
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        reason = channel.closed() => Outcome::Closed(reason),
        signal = interrupt => match signal {
            Ok(()) => {
                warn!("interrupted, closing connection");
                channel.close().await;
                let _ = channel.closed().await;
                Outcome::Interrupted
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for ctrl-c");
                Outcome::Closed(channel.closed().await)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::future;

    use assert_matches::assert_matches;
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn duplex_channel() -> (Channel, tokio::task::JoinHandle<CloseReason>, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let pipeline = Pipeline::new().with_stage(HttpCodecStage::new());
        let peer = "127.0.0.1:8080".parse().unwrap();
        let (channel, task) = Channel::spawn(&Handle::current(), Box::new(local), pipeline, peer);
        (channel, task, remote)
    }

    #[tokio::test]
    async fn interrupt_closes_the_connection_locally() {
        let (channel, task, _remote) = duplex_channel();

        let outcome = wait_for_close(&channel, future::ready(Ok(()))).await;
        assert_eq!(outcome, Outcome::Interrupted);
        assert_eq!(task.await.unwrap(), CloseReason::Local);
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn peer_close_wins_over_a_pending_interrupt() {
        let (channel, _task, remote) = duplex_channel();
        drop(remote);

        let outcome = wait_for_close(&channel, future::pending::<std::io::Result<()>>()).await;
        assert_eq!(outcome, Outcome::Closed(CloseReason::Peer));
    }

    #[tokio::test]
    async fn failed_signal_listener_falls_back_to_waiting() {
        let (channel, _task, remote) = duplex_channel();
        let interrupt = future::ready(Err(std::io::Error::other("no signal handler")));
        let waiter = tokio::spawn({
            let channel = channel.clone();
            async move { wait_for_close(&channel, interrupt).await }
        });
        drop(remote);

        assert_eq!(waiter.await.unwrap(), Outcome::Closed(CloseReason::Peer));
    }

    #[tokio::test]
    async fn rejected_write_reports_the_published_error() {
        let (channel, task, mut remote) = duplex_channel();
        remote.write_all(b"GARBAGE NOT HTTP\r\n\r\n").await.unwrap();
        assert!(task.await.unwrap().is_error());

        let err = channel
            .write_and_flush(HttpRequest::get("/", "h"))
            .await
            .unwrap_err();
        assert_matches!(err, ChannelError::Closed);
        assert_matches!(
            rejected_write(&channel, 2, 3).await,
            ProbeError::Session { sent: 2, message } if message.contains("malformed")
        );
    }

    #[tokio::test]
    async fn rejected_write_after_peer_close_is_closed_early() {
        let (channel, task, remote) = duplex_channel();
        drop(remote);
        assert_eq!(task.await.unwrap(), CloseReason::Peer);

        assert_matches!(
            rejected_write(&channel, 1, 3).await,
            ProbeError::ClosedEarly { sent: 1, planned: 3 }
        );
    }

    #[test]
    fn default_plan_is_three_requests_five_seconds_apart() {
        let plan = RequestPlan::default();
        assert_eq!(plan.requests, 3);
        assert_eq!(plan.interval, Duration::from_secs(5));
    }

    #[test]
    fn pipeline_order_follows_settings() {
        let stats = ResponseStats::new();
        let plain = build_pipeline(&ProbeSettings::default(), &stats);
        assert_eq!(plain.names(), ["http-codec", "response-logger"]);

        let settings = ProbeSettings {
            wire_log: true,
            ..ProbeSettings::default()
        };
        let logged = build_pipeline(&settings, &stats);
        assert_eq!(logged.names(), ["wire-logger", "http-codec", "response-logger"]);
    }

    #[test]
    fn report_exit_codes() {
        let mut report = SessionReport {
            peer: "127.0.0.1:8080".parse().unwrap(),
            requests_sent: 3,
            responses_received: 3,
            body_bytes: 0,
            outcome: Outcome::Closed(CloseReason::Peer),
        };
        assert_eq!(report.exit_code(), EXIT_OK);
        report.outcome = Outcome::Interrupted;
        assert_eq!(report.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn runtime_runs_futures_on_named_workers() {
        let runtime = IoRuntime::new().unwrap();
        let name = runtime.block_on(async {
            tokio::spawn(async { std::thread::current().name().map(str::to_owned) })
                .await
                .unwrap()
        });
        assert_eq!(name.as_deref(), Some("probe-io"));
        runtime.shutdown();
    }

    #[test]
    fn close_reason_picks_the_error_variant() {
        assert_matches!(
            closed_before(CloseReason::Peer, 1, 3),
            ProbeError::ClosedEarly { sent: 1, planned: 3 }
        );
        assert_matches!(
            closed_before(CloseReason::Error("reset".into()), 2, 3),
            ProbeError::Session { sent: 2, message } if message == "reset"
        );
    }
}
