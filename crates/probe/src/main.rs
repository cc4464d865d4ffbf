//! # probe
//!
//! Probe binary: resolve settings, open one connection, send three `GET`
//! requests five seconds apart, log every response, and exit once the
//! connection closes.

#![deny(unsafe_code)]

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use probe_client::{EXIT_CONFIG, EXIT_CONNECT, ProbeError, RequestPlan, run_probe};
use probe_logging::{LogFormat, LoggingConfig, init_logging};
use probe_settings::{Properties, SettingsError, load_settings};
use tracing::{error, info};

/// One-shot HTTP/1.1 probe client.
///
/// Every option can also be set through a `PROBE_<KEY>` environment
/// variable; flags given here take precedence.
#[derive(Parser, Debug)]
#[command(name = "probe", version, about = "One-shot HTTP/1.1 probe client")]
struct Cli {
    /// Use TLS, accepting any server certificate.
    #[arg(long)]
    ssl: bool,

    /// Remote host [default: 127.0.0.1].
    #[arg(long)]
    host: Option<String>,

    /// Request target for every GET [default: /whatever].
    #[arg(long)]
    url: Option<String>,

    /// Remote port [default: 8080].
    #[arg(long)]
    port: Option<String>,

    /// Payload size hint [default: 256].
    #[arg(long)]
    size: Option<String>,

    /// Log raw bytes in both directions as hex dumps.
    #[arg(long)]
    wire_log: bool,
}

impl Cli {
    /// Only the options actually given; the rest fall through to the
    /// environment and then the defaults.
    fn into_properties(self) -> Properties {
        let mut props = Properties::new();
        if self.ssl {
            props.set("ssl", "true");
        }
        if self.wire_log {
            props.set("wire_log", "true");
        }
        let values = [
            ("host", self.host),
            ("url", self.url),
            ("port", self.port),
            ("size", self.size),
        ];
        for (key, value) in values
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
        {
            props.set(key, value);
        }
        props
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        format: LogFormat::from_env(),
        ..LoggingConfig::default()
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("probe: {err}");
    }

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            let code = exit_code_for(&err);
            error!(exit_code = code, "{err:#}");
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let settings = load_settings(cli.into_properties()).context("invalid configuration")?;
    info!(
        ssl = settings.ssl,
        host = %settings.host,
        port = settings.port,
        url = %settings.url,
        size = settings.size,
        wire_log = settings.wire_log,
        "starting probe"
    );

    let report = run_probe(&settings, &RequestPlan::default())?;
    info!(
        peer = %report.peer,
        requests = report.requests_sent,
        responses = report.responses_received,
        outcome = ?report.outcome,
        "probe finished"
    );
    Ok(report.exit_code())
}

/// Map a failure to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<SettingsError>().is_some() {
        EXIT_CONFIG
    } else if let Some(probe) = err.downcast_ref::<ProbeError>() {
        probe.exit_code()
    } else {
        EXIT_CONNECT
    }
}
