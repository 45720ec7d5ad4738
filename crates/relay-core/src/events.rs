//! Inbound trigger messages and the router that hands each to its handler.
//!
//! Messages arrive as JSON objects tagged by `type`. [`EventRouter::handle`]
//! processes one message to completion; [`EventRouter::spawn`] runs a channel
//! loop that launches family pipelines concurrently and feeds every finished
//! run back into the dispatch gate. Handler failures become error reports;
//! they never stop the loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use relay_state::Conclusion;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::dispatch_gate::{DownstreamDispatchGate, GateOutcome};
use crate::domain::dispatch::DispatchEvent;
use crate::domain::error::{RelayError, Result};
use crate::domain::merge::{ChangeRequest, SemverClass};
use crate::domain::run::PipelineRunResult;
use crate::domain::tag::ReleaseTag;
use crate::domain::target::OsFamily;
use crate::merge_policy::{AutoMergePolicy, MergeApprover, MergeVerdict};

/// A trigger message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A version tag was pushed; build every configured family.
    TagPushed { tag: String },
    /// Operator-requested run of one family. Without a tag the version is
    /// resolved from the manifest.
    ManualRun {
        family: OsFamily,
        #[serde(default)]
        tag: Option<String>,
    },
    /// Operator-requested downstream dispatch, bypassing the gate.
    ManualDispatch { cycle: String, operator: String },
    /// A family pipeline concluded (possibly reported by another process).
    RunConcluded {
        family: OsFamily,
        tag: String,
        conclusion: Conclusion,
        #[serde(default)]
        run_id: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// A dependency-update change request whose CI finished.
    ChangeRequest {
        id: u64,
        actor: String,
        update_type: String,
        ci_conclusion: Conclusion,
    },
}

impl InboundEvent {
    pub fn parse_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::TagPushed { .. } => "tag_pushed",
            InboundEvent::ManualRun { .. } => "manual_run",
            InboundEvent::ManualDispatch { .. } => "manual_dispatch",
            InboundEvent::RunConcluded { .. } => "run_concluded",
            InboundEvent::ChangeRequest { .. } => "change_request",
        }
    }

    /// The gate notification for a finished run.
    pub fn from_result(result: &PipelineRunResult) -> Self {
        InboundEvent::RunConcluded {
            family: result.family,
            tag: result.tag.display().to_string(),
            conclusion: result.conclusion,
            run_id: Some(result.run_id.clone()),
            timestamp: Some(result.finished_at),
        }
    }
}

/// Starts family pipeline runs.
#[async_trait]
pub trait RunLauncher: Send + Sync {
    /// Families built on a tag push.
    fn families(&self) -> Vec<OsFamily>;

    /// Run one family to completion and return its finalized result.
    ///
    /// Run failures (including precondition failures) are reported through
    /// the result's conclusion; `Err` means no run could be recorded at all.
    async fn launch(&self, family: OsFamily, pushed: Option<ReleaseTag>) -> Result<PipelineRunResult>;
}

/// What handling one message produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReportDetail {
    Launched {
        tag: Option<String>,
        families: Vec<OsFamily>,
    },
    RunFinished {
        run: PipelineRunResult,
    },
    Gate {
        cycle: String,
        family: OsFamily,
        outcome: GateOutcome,
    },
    ManualDispatched {
        event: DispatchEvent,
    },
    Merge {
        id: u64,
        verdict: MergeVerdict,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventReport {
    pub event: String,
    #[serde(flatten)]
    pub detail: ReportDetail,
}

impl EventReport {
    fn new(event: &str, detail: ReportDetail) -> Self {
        Self {
            event: event.to_string(),
            detail,
        }
    }

    pub fn error(event: &str, err: &RelayError) -> Self {
        warn!(event = %event, error = %err, "handler failed");
        Self::new(
            event,
            ReportDetail::Error {
                message: err.to_string(),
            },
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self.detail, ReportDetail::Error { .. })
    }
}

/// Handles returned by [`EventRouter::spawn`].
pub struct RouterHandle {
    pub sender: mpsc::Sender<InboundEvent>,
    pub reports: mpsc::UnboundedReceiver<EventReport>,
    pub task: JoinHandle<()>,
}

pub struct EventRouter {
    gate: Arc<DownstreamDispatchGate>,
    launcher: Arc<dyn RunLauncher>,
    policy: AutoMergePolicy,
    approver: Arc<dyn MergeApprover>,
}

impl EventRouter {
    pub fn new(
        gate: Arc<DownstreamDispatchGate>,
        launcher: Arc<dyn RunLauncher>,
        policy: AutoMergePolicy,
        approver: Arc<dyn MergeApprover>,
    ) -> Self {
        Self {
            gate,
            launcher,
            policy,
            approver,
        }
    }

    pub fn gate(&self) -> &DownstreamDispatchGate {
        &self.gate
    }

    /// Process one message to completion. Launches run concurrently and
    /// each finished run is fed to the gate before returning.
    pub async fn handle(&self, event: InboundEvent) -> Vec<EventReport> {
        let kind = event.kind();
        match event {
            InboundEvent::TagPushed { tag } => match ReleaseTag::parse_tag(&tag) {
                Ok(tag) => {
                    self.run_families(kind, self.launcher.families(), Some(tag))
                        .await
                }
                Err(e) => vec![EventReport::error(kind, &e)],
            },
            InboundEvent::ManualRun { family, tag } => {
                match tag.as_deref().map(ReleaseTag::parse_tag).transpose() {
                    Ok(tag) => self.run_families(kind, vec![family], tag).await,
                    Err(e) => vec![EventReport::error(kind, &e)],
                }
            }
            other => vec![self.handle_single(other).await],
        }
    }

    /// Messages that need no pipeline run.
    async fn handle_single(&self, event: InboundEvent) -> EventReport {
        let kind = event.kind();
        let detail = match event {
            InboundEvent::ManualDispatch { cycle, operator } => self
                .gate
                .manual_dispatch(&cycle, &operator)
                .await
                .map(|event| ReportDetail::ManualDispatched { event }),
            InboundEvent::RunConcluded {
                family,
                tag,
                conclusion,
                run_id,
                timestamp,
            } => self
                .conclude(family, &tag, conclusion, run_id, timestamp)
                .await,
            InboundEvent::ChangeRequest {
                id,
                actor,
                update_type,
                ci_conclusion,
            } => self.judge(id, actor, &update_type, ci_conclusion).await,
            InboundEvent::TagPushed { .. } | InboundEvent::ManualRun { .. } => Err(
                RelayError::Config(format!("{kind} must be routed through a launch")),
            ),
        };
        match detail {
            Ok(detail) => EventReport::new(kind, detail),
            Err(e) => EventReport::error(kind, &e),
        }
    }

    async fn conclude(
        &self,
        family: OsFamily,
        tag: &str,
        conclusion: Conclusion,
        run_id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<ReportDetail> {
        let tag = ReleaseTag::parse_tag(tag)?;
        let outcome = self
            .gate
            .notify(
                tag.display(),
                family,
                conclusion,
                run_id,
                timestamp.unwrap_or_else(Utc::now),
            )
            .await?;
        Ok(ReportDetail::Gate {
            cycle: tag.display().to_string(),
            family,
            outcome,
        })
    }

    async fn judge(
        &self,
        id: u64,
        actor: String,
        update_type: &str,
        ci_conclusion: Conclusion,
    ) -> Result<ReportDetail> {
        let request = ChangeRequest {
            id,
            actor,
            semver_class: update_type.parse::<SemverClass>()?,
            ci_conclusion,
        };
        let verdict = self.policy.judge(&request, self.approver.as_ref()).await?;
        Ok(ReportDetail::Merge { id, verdict })
    }

    async fn run_families(
        &self,
        kind: &str,
        families: Vec<OsFamily>,
        tag: Option<ReleaseTag>,
    ) -> Vec<EventReport> {
        let mut reports = vec![EventReport::new(
            kind,
            ReportDetail::Launched {
                tag: tag.as_ref().map(|t| t.display().to_string()),
                families: families.clone(),
            },
        )];
        let launches = families
            .iter()
            .map(|family| self.launcher.launch(*family, tag.clone()));
        for result in join_all(launches).await {
            reports.extend(self.after_run(kind, result).await);
        }
        reports
    }

    async fn after_run(&self, kind: &str, result: Result<PipelineRunResult>) -> Vec<EventReport> {
        match result {
            Ok(run) => {
                let next = InboundEvent::from_result(&run);
                vec![
                    EventReport::new(kind, ReportDetail::RunFinished { run }),
                    self.handle_single(next).await,
                ]
            }
            Err(e) => vec![EventReport::error(kind, &e)],
        }
    }

    /// Run the router as a channel loop.
    ///
    /// Launches are spawned so that long builds never block other messages.
    /// The loop ends once every sender is dropped and all in-flight runs
    /// have been fed to the gate.
    pub fn spawn(self: Arc<Self>, buffer: usize) -> RouterHandle {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(buffer.max(1));
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut launches: JoinSet<(String, Result<PipelineRunResult>)> = JoinSet::new();
            let mut inbound_open = true;
            let emit = |report: EventReport| {
                if report_tx.send(report).is_err() {
                    debug!("report receiver dropped");
                }
            };

            loop {
                tokio::select! {
                    event = rx.recv(), if inbound_open => {
                        let Some(event) = event else {
                            inbound_open = false;
                            continue;
                        };
                        debug!(kind = event.kind(), "routing event");
                        let kind = event.kind();
                        match event {
                            InboundEvent::TagPushed { tag } => match ReleaseTag::parse_tag(&tag) {
                                Ok(tag) => {
                                    let families = self.launcher.families();
                                    emit(EventReport::new(kind, ReportDetail::Launched {
                                        tag: Some(tag.display().to_string()),
                                        families: families.clone(),
                                    }));
                                    for family in families {
                                        self.spawn_launch(&mut launches, kind, family, Some(tag.clone()));
                                    }
                                }
                                Err(e) => emit(EventReport::error(kind, &e)),
                            },
                            InboundEvent::ManualRun { family, tag } => {
                                match tag.as_deref().map(ReleaseTag::parse_tag).transpose() {
                                    Ok(tag) => {
                                        emit(EventReport::new(kind, ReportDetail::Launched {
                                            tag: tag.as_ref().map(|t| t.display().to_string()),
                                            families: vec![family],
                                        }));
                                        self.spawn_launch(&mut launches, kind, family, tag);
                                    }
                                    Err(e) => emit(EventReport::error(kind, &e)),
                                }
                            }
                            other => emit(self.handle_single(other).await),
                        }
                    }
                    Some(joined) = launches.join_next(), if !launches.is_empty() => {
                        match joined {
                            Ok((kind, result)) => {
                                for report in self.after_run(&kind, result).await {
                                    emit(report);
                                }
                            }
                            Err(e) => emit(EventReport::error(
                                "launch",
                                &RelayError::Toolchain(format!("launch task failed: {e}")),
                            )),
                        }
                    }
                    else => break,
                }
            }
            debug!("event router stopped");
        });

        RouterHandle {
            sender: tx,
            reports: report_rx,
            task,
        }
    }

    fn spawn_launch(
        &self,
        launches: &mut JoinSet<(String, Result<PipelineRunResult>)>,
        kind: &str,
        family: OsFamily,
        tag: Option<ReleaseTag>,
    ) {
        let launcher = Arc::clone(&self.launcher);
        let kind = kind.to_string();
        launches.spawn(async move { (kind, launcher.launch(family, tag).await) });
    }
}
