//! relayd: reads newline-delimited JSON trigger messages on stdin, routes
//! each to its handler and writes one JSON report per line on stdout.
//!
//! On end of input the daemon waits for in-flight runs and their gate
//! notifications. An interrupt cancels in-flight runs first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_cli::{AppOptions, RelayApp};
use relay_core::config::DEFAULT_CONFIG_FILE;
use relay_core::{telemetry, EventReport, InboundEvent, RouterHandle};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "relayd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release Relay trigger router", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Path to the release configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Keep uploads in memory and log dispatches instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Inbound queue depth
    #[arg(long, default_value = "64")]
    buffer: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(args.json, level);

    let app = RelayApp::load(
        &args.config,
        AppOptions {
            dry_run: args.dry_run,
        },
    )?;
    let launcher = Arc::new(app.launcher()?);
    let router = Arc::new(app.router(launcher.clone())?);
    let RouterHandle {
        sender,
        mut reports,
        task,
    } = router.spawn(args.buffer);
    info!(config = %args.config.display(), dry_run = args.dry_run, "relayd started");

    let mut sender = Some(sender);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut interrupted = false;

    loop {
        tokio::select! {
            line = lines.next_line(), if sender.is_some() => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match InboundEvent::parse_line(&line) {
                        Ok(event) => {
                            let open = match &sender {
                                Some(tx) => tx.send(event).await.is_ok(),
                                None => false,
                            };
                            if !open {
                                warn!("router stopped; dropping input");
                                sender = None;
                            }
                        }
                        Err(e) => write_report(&mut stdout, &EventReport::error("malformed", &e)).await?,
                    },
                    None => {
                        info!("input closed; waiting for in-flight runs");
                        sender = None;
                    }
                }
            }
            report = reports.recv() => match report {
                Some(report) => write_report(&mut stdout, &report).await?,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                sender = None;
                let cancelled = launcher.cancel_all();
                info!(cancelled, "interrupted; cancelling in-flight runs");
            }
        }
    }

    task.await.context("Router task failed")?;
    info!("relayd stopped");
    Ok(())
}

async fn write_report<W: AsyncWrite + Unpin>(out: &mut W, report: &EventReport) -> Result<()> {
    let mut line = serde_json::to_vec(report)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::RelayError;

    #[tokio::test]
    async fn reports_are_one_json_object_per_line() {
        let mut out = Vec::new();
        let report = EventReport::error("malformed", &RelayError::Config("bad".to_string()));
        write_report(&mut out, &report).await.unwrap();
        write_report(&mut out, &report).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["event"], "malformed");
        assert_eq!(value["result"], "error");
    }

    #[test]
    fn args_default_to_relay_toml() {
        let args = Args::parse_from(["relayd"]);
        assert_eq!(args.config, PathBuf::from("relay.toml"));
        assert_eq!(args.buffer, 64);
    }
}
