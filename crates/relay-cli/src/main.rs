//! Release Relay CLI
//!
//! The `relay` command drives every release trigger by hand:
//!
//! - `version`: resolve the release tag from the manifest
//! - `run`: build, package and upload one or all OS families
//! - `notify`: report a family conclusion to the dispatch gate
//! - `dispatch`: manually dispatch a release cycle downstream
//! - `gate`: inspect release cycles
//! - `automerge`: judge a dependency-update change request
//! - `runs`: list recorded pipeline runs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_core::config::DEFAULT_CONFIG_FILE;
use relay_core::{
    resolve_for_trigger, resolve_manifest, telemetry, ChangeRequest, EventReport, InboundEvent,
    OsFamily, ReleaseTag, SemverClass,
};
use relay_cli::{AppOptions, RelayApp};
use relay_state::Conclusion;
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-target release orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to the release configuration
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Keep uploads in memory and log dispatches instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the release tag resolved from the manifest
    Version {
        /// Fail unless the manifest version matches this pushed tag
        #[arg(long)]
        check_tag: Option<String>,
    },

    /// Run release pipelines and feed each conclusion to the dispatch gate
    Run {
        /// OS family to run, or `all`
        #[arg(default_value = "all")]
        family: String,

        /// Pushed tag that triggered the run
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Report a family conclusion for a release cycle
    Notify {
        #[arg(long)]
        family: OsFamily,

        /// Release tag, e.g. v2.3.1
        #[arg(long)]
        tag: String,

        #[arg(long)]
        conclusion: Conclusion,

        #[arg(long)]
        run_id: Option<String>,
    },

    /// Dispatch a release cycle downstream, bypassing the gate
    Dispatch {
        /// Release cycle (tag display form)
        cycle: String,

        /// Operator requesting the dispatch
        #[arg(short, long, env = "RELAY_OPERATOR")]
        operator: String,
    },

    /// Inspect release cycles
    Gate {
        #[command(subcommand)]
        action: GateAction,
    },

    /// Judge a dependency-update change request and merge it when eligible
    Automerge {
        /// Change request number
        #[arg(long)]
        id: u64,

        /// Login of the change request author
        #[arg(long)]
        actor: String,

        /// Update type, e.g. `version-update:semver-patch`
        #[arg(long)]
        update_type: SemverClass,

        /// CI conclusion for the change request
        #[arg(long)]
        ci_conclusion: Conclusion,
    },

    /// List recorded pipeline runs
    Runs {
        /// Only runs for this tag
        #[arg(long)]
        tag: Option<String>,
    },
}

#[derive(Subcommand)]
enum GateAction {
    /// Show one release cycle
    Status { cycle: String },

    /// List cycles not dispatched after the given age
    Stale {
        #[arg(long, default_value = "24")]
        max_age_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let app = RelayApp::load(
        &cli.config,
        AppOptions {
            dry_run: cli.dry_run,
        },
    )?;

    match cli.command {
        Commands::Version { check_tag } => cmd_version(&app, check_tag.as_deref()),
        Commands::Run { family, tag } => cmd_run(&app, &family, tag).await,
        Commands::Notify {
            family,
            tag,
            conclusion,
            run_id,
        } => cmd_notify(&app, family, &tag, conclusion, run_id).await,
        Commands::Dispatch { cycle, operator } => cmd_dispatch(&app, &cycle, &operator).await,
        Commands::Gate { action } => match action {
            GateAction::Status { cycle } => cmd_gate_status(&app, &cycle).await,
            GateAction::Stale { max_age_hours } => cmd_gate_stale(&app, max_age_hours).await,
        },
        Commands::Automerge {
            id,
            actor,
            update_type,
            ci_conclusion,
        } => {
            let request = ChangeRequest {
                id,
                actor,
                semver_class: update_type,
                ci_conclusion,
            };
            cmd_automerge(&app, &request).await
        }
        Commands::Runs { tag } => cmd_runs(&app, tag.as_deref()).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_version(app: &RelayApp, check_tag: Option<&str>) -> Result<()> {
    let manifest = app.workspace.join(&app.config.manifest_path);
    let tag = match check_tag {
        Some(pushed) => {
            let pushed = ReleaseTag::parse_tag(pushed)?;
            resolve_for_trigger(&manifest, Some(&pushed))?
        }
        None => resolve_manifest(&manifest)
            .with_context(|| format!("Failed to resolve version from {}", manifest.display()))?,
    };
    println!("{tag}");
    Ok(())
}

/// Run one family or all of them through the router, so every finished run
/// reaches the gate exactly as it would under `relayd`.
async fn cmd_run(app: &RelayApp, family: &str, tag: Option<String>) -> Result<()> {
    let launcher = Arc::new(app.launcher()?);
    let router = app.router(launcher)?;

    let event = if family.eq_ignore_ascii_case("all") {
        let tag = match tag {
            Some(tag) => tag,
            None => {
                let manifest = app.workspace.join(&app.config.manifest_path);
                resolve_manifest(&manifest)?.display().to_string()
            }
        };
        InboundEvent::TagPushed { tag }
    } else {
        InboundEvent::ManualRun {
            family: family.parse()?,
            tag,
        }
    };

    info!(event = event.kind(), dry_run = app.is_dry_run(), "starting release run");
    let reports = router.handle(event).await;
    print_json(&reports)?;
    fail_on_error(&reports)
}

fn fail_on_error(reports: &[EventReport]) -> Result<()> {
    let errors = reports.iter().filter(|r| r.is_error()).count();
    if errors > 0 {
        anyhow::bail!("{errors} of {} steps failed", reports.len());
    }
    Ok(())
}

async fn cmd_notify(
    app: &RelayApp,
    family: OsFamily,
    tag: &str,
    conclusion: Conclusion,
    run_id: Option<String>,
) -> Result<()> {
    let cycle = ReleaseTag::parse_tag(tag)?;
    let gate = app.gate()?;
    let outcome = gate
        .notify(
            cycle.display(),
            family,
            conclusion,
            run_id,
            chrono::Utc::now(),
        )
        .await
        .context("Gate notification failed")?;
    print_json(&outcome)
}

async fn cmd_dispatch(app: &RelayApp, cycle: &str, operator: &str) -> Result<()> {
    let gate = app.gate()?;
    let event = gate
        .manual_dispatch(cycle, operator)
        .await
        .with_context(|| format!("Manual dispatch of {cycle} failed"))?;
    print_json(&event)
}

async fn cmd_gate_status(app: &RelayApp, cycle: &str) -> Result<()> {
    let gate = app.read_only_gate()?;
    match gate.status(cycle).await? {
        Some(record) => print_json(&record),
        None => {
            println!("No release cycle recorded for {cycle}");
            Ok(())
        }
    }
}

async fn cmd_gate_stale(app: &RelayApp, max_age_hours: i64) -> Result<()> {
    let gate = app.read_only_gate()?;
    let stale = gate
        .stale_cycles(chrono::Duration::hours(max_age_hours))
        .await?;
    if stale.is_empty() {
        println!("No stale release cycles");
        return Ok(());
    }
    for record in &stale {
        let required = gate.required_families();
        println!(
            "{} first seen {} missing [{}] failed [{}]",
            record.cycle,
            record.first_seen.to_rfc3339(),
            record.missing(required).join(", "),
            record.failed_families(required).join(", "),
        );
    }
    Ok(())
}

async fn cmd_automerge(app: &RelayApp, request: &ChangeRequest) -> Result<()> {
    let approver = app.approver()?;
    let verdict = app
        .config
        .merge_policy()
        .judge(request, approver.as_ref())
        .await
        .with_context(|| format!("Auto-merge of change request {} failed", request.id))?;
    print_json(&verdict)
}

async fn cmd_runs(app: &RelayApp, tag: Option<&str>) -> Result<()> {
    let runs = app.ledger().list_runs(tag).await?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }
    for run in runs {
        let conclusion = run
            .conclusion
            .map(|c| c.to_string())
            .unwrap_or_else(|| "in progress".to_string());
        println!(
            "{} {} {} {} {}",
            run.started_at.to_rfc3339(),
            run.run_id,
            run.metadata.tag,
            run.metadata.family,
            conclusion
        );
    }
    Ok(())
}
