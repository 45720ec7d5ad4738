//! One release pipeline run for one OS family.
//!
//! `Pending -> TestGate -> Building -> Packaging -> Uploading -> Succeeded`,
//! with `Failed` and `Cancelled` reachable from every live state. Targets of
//! the family build concurrently in their own work directories; the run only
//! advances once all of them finished, and any failed target fails the run
//! before anything is packaged or uploaded. The ledger record is finalized
//! exactly once, whatever the outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use relay_core::obs;
use relay_core::{
    resolve_for_trigger, BuildArtifact, BuildExecutor, OsFamily, Packager, PipelineRunResult,
    RelayError, ReleaseTag, Result, RunState, TargetSpec, TestGate, TestOutcome, UploadedArtifact,
    Uploader,
};
use relay_state::{RunId, RunLedger, RunMetadata};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};

use crate::git::capture_head_sha;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Owner side of a run's cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Run side of the cancellation signal; checked at phase boundaries and
/// raced against long phases.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A linked handle/token pair.
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is dropped first.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and report
// ---------------------------------------------------------------------------

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct PipelineDeps {
    pub test_gate: Arc<dyn TestGate>,
    pub builder: Arc<dyn BuildExecutor>,
    pub packager: Packager,
    pub uploader: Arc<Uploader>,
    pub ledger: Arc<dyn RunLedger>,
}

/// What to run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub family: OsFamily,
    pub targets: Vec<TargetSpec>,
    pub manifest_path: PathBuf,
    pub workspace: PathBuf,
    /// Each target builds in `<work_root>/<triple>`.
    pub work_root: PathBuf,
    /// Tag that triggered the run, if any; must match the resolved version.
    pub pushed: Option<ReleaseTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
    pub triple: String,
    pub reason: String,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub result: PipelineRunResult,
    pub state: RunState,
    pub transitions: Vec<Transition>,
    pub commit_sha: Option<String>,
    pub failures: Vec<TargetFailure>,
    pub uploads: Vec<UploadedArtifact>,
    /// Why the run failed, when it did.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Live state of one run.
#[derive(Debug)]
pub struct PipelineRun {
    run_id: RunId,
    state: RunState,
    transitions: Vec<Transition>,
    failures: Vec<TargetFailure>,
    uploads: Vec<UploadedArtifact>,
    error: Option<String>,
}

impl PipelineRun {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            state: RunState::Pending,
            transitions: Vec::new(),
            failures: Vec::new(),
            uploads: Vec::new(),
            error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `to`, rejecting anything the lifecycle does not allow.
    pub fn advance(&mut self, to: RunState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(RelayError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        obs::emit_run_transition(&self.run_id.0, &self.state.to_string(), &to.to_string());
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }

    fn fail(&mut self, err: &RelayError) -> Result<()> {
        warn!(run_id = %self.run_id, state = %self.state, error = %err, "run failed");
        self.error = Some(err.to_string());
        self.advance(RunState::Failed)
    }

    fn cancel(&mut self) -> Result<()> {
        info!(run_id = %self.run_id, state = %self.state, "run cancelled");
        self.advance(RunState::Cancelled)
    }

    /// Cancel if the token fired; returns whether it did.
    fn check_cancel(&mut self, cancel: &CancelToken) -> Result<bool> {
        if cancel.is_cancelled() {
            self.cancel()?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Executes pipeline runs.
pub struct Pipeline;

impl Pipeline {
    /// Run `request` to a terminal state and finalize it in the ledger.
    ///
    /// Returns `Err` only when the run could not be recorded at all; every
    /// other failure is reported through the conclusion.
    pub async fn execute(
        deps: &PipelineDeps,
        request: PipelineRequest,
        mut cancel: CancelToken,
    ) -> Result<PipelineReport> {
        let started = Instant::now();
        let resolved = resolve_for_trigger(&request.manifest_path, request.pushed.as_ref());
        let tag = match (&resolved, &request.pushed) {
            (Ok(tag), _) => tag.clone(),
            (Err(_), Some(pushed)) => pushed.clone(),
            (Err(e), None) => {
                return Err(RelayError::VersionMetadata(format!(
                    "cannot attribute run to a release: {e}"
                )))
            }
        };

        let commit_sha = capture_head_sha(&request.workspace).await.ok();
        let metadata = RunMetadata {
            family: request.family.as_str().to_string(),
            tag: tag.display().to_string(),
            commit_sha: commit_sha.clone(),
            targets: request.targets.iter().map(|t| t.triple.clone()).collect(),
        };
        let run_id = deps.ledger.start_run(metadata).await?;
        let span = obs::run_span(&run_id.0, request.family.as_str(), tag.display());

        async move {
            obs::emit_run_started(
                &run_id.0,
                request.family.as_str(),
                tag.display(),
                request.targets.len(),
            );

            let mut run = PipelineRun::new(run_id.clone());
            if let Err(e) = resolved {
                run.fail(&e)?;
            } else {
                Self::drive(deps, &request, &tag, &mut run, &mut cancel).await?;
            }

            let conclusion = run.state.conclusion().ok_or_else(|| {
                RelayError::InvalidTransition {
                    from: run.state.to_string(),
                    to: "finalized".to_string(),
                }
            })?;
            let record = deps.ledger.finalize_run(&run_id, conclusion).await?;
            let result = PipelineRunResult::from_record(&record)?;
            obs::emit_run_finished(
                &run_id.0,
                conclusion.as_str(),
                started.elapsed().as_millis() as u64,
            );

            Ok::<_, RelayError>(PipelineReport {
                result,
                state: run.state,
                transitions: run.transitions,
                commit_sha,
                failures: run.failures,
                uploads: run.uploads,
                error: run.error,
            })
        }
        .instrument(span)
        .await
    }

    /// Walk the live states. Leaves `run` terminal; only invalid transitions
    /// escape as errors.
    async fn drive(
        deps: &PipelineDeps,
        request: &PipelineRequest,
        tag: &ReleaseTag,
        run: &mut PipelineRun,
        cancel: &mut CancelToken,
    ) -> Result<()> {
        if request.targets.is_empty() {
            return run.fail(&RelayError::InvalidTarget(format!(
                "no targets configured for {}",
                request.family
            )));
        }
        if let Some(stray) = request.targets.iter().find(|t| t.family != request.family) {
            return run.fail(&RelayError::InvalidTarget(format!(
                "{} does not belong to family {}",
                stray.triple, request.family
            )));
        }

        // Test gate
        if run.check_cancel(cancel)? {
            return Ok(());
        }
        run.advance(RunState::TestGate)?;
        let outcome = tokio::select! {
            outcome = deps.test_gate.run_tests(&request.workspace) => outcome,
            _ = cancel.cancelled() => return run.cancel(),
        };
        match outcome {
            Ok(TestOutcome::Pass) => {}
            Ok(TestOutcome::Fail { summary }) => {
                return run.fail(&RelayError::TestsFailed(summary));
            }
            Err(e) => return run.fail(&e),
        }

        // Build fan-out
        if run.check_cancel(cancel)? {
            return Ok(());
        }
        run.advance(RunState::Building)?;
        let binaries = tokio::select! {
            built = Self::build_all(deps, request, &run.run_id) => built,
            _ = cancel.cancelled() => return run.cancel(),
        };
        let mut built = Vec::new();
        for (target, outcome) in binaries {
            match outcome {
                Ok(binary) => built.push((target, binary)),
                Err(e) => run.failures.push(TargetFailure {
                    triple: target.triple.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        if !run.failures.is_empty() {
            let names: Vec<&str> = run.failures.iter().map(|f| f.triple.as_str()).collect();
            let err = RelayError::Build {
                target: names.join(", "),
                reason: format!("{} of {} targets failed", names.len(), request.targets.len()),
            };
            return run.fail(&err);
        }

        // Packaging
        if run.check_cancel(cancel)? {
            return Ok(());
        }
        run.advance(RunState::Packaging)?;
        let mut artifacts: Vec<BuildArtifact> = Vec::with_capacity(built.len());
        for (target, binary) in built {
            match deps.packager.package(tag, &target, binary) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => return run.fail(&e),
            }
        }

        // Upload
        if run.check_cancel(cancel)? {
            return Ok(());
        }
        run.advance(RunState::Uploading)?;
        if let Err(e) = deps.uploader.prepare(tag).await {
            return run.fail(&e);
        }
        for artifact in &artifacts {
            match deps.uploader.upload(tag, artifact).await {
                Ok(uploaded) => run.uploads.push(uploaded),
                Err(e) => return run.fail(&e),
            }
        }

        run.advance(RunState::Succeeded)
    }

    /// Build every target concurrently. Results come back in target order.
    async fn build_all(
        deps: &PipelineDeps,
        request: &PipelineRequest,
        run_id: &RunId,
    ) -> Vec<(TargetSpec, Result<Vec<u8>>)> {
        let mut set = JoinSet::new();
        for (idx, target) in request.targets.iter().cloned().enumerate() {
            let builder = Arc::clone(&deps.builder);
            let workspace = request.workspace.clone();
            let work_dir = request.work_root.join(&target.triple);
            set.spawn(async move {
                let outcome = builder.build(&target, &workspace, &work_dir).await;
                (idx, target, outcome)
            });
        }

        let mut results: Vec<Option<(TargetSpec, Result<Vec<u8>>)>> =
            (0..request.targets.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, target, outcome)) => {
                    obs::emit_target_built(
                        &run_id.0,
                        &target.triple,
                        outcome.as_ref().map(|b| b.len()).unwrap_or(0),
                        outcome.is_ok(),
                    );
                    results[idx] = Some((target, outcome));
                }
                Err(e) => warn!(run_id = %run_id, error = %e, "build task panicked"),
            }
        }

        results
            .into_iter()
            .zip(request.targets.iter())
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    (
                        target.clone(),
                        Err(RelayError::Build {
                            target: target.triple.clone(),
                            reason: "build task aborted".to_string(),
                        }),
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_follows_lifecycle() {
        let mut run = PipelineRun::new(RunId("r".to_string()));
        run.advance(RunState::TestGate).unwrap();
        let err = run.advance(RunState::Uploading).unwrap_err();
        assert!(matches!(err, RelayError::InvalidTransition { .. }));
        run.advance(RunState::Building).unwrap();
        run.advance(RunState::Failed).unwrap();
        assert!(run.advance(RunState::Packaging).is_err());
        assert!(run.advance(RunState::Cancelled).is_err());
        assert_eq!(run.transitions.len(), 3);
    }

    #[tokio::test]
    async fn cancel_token_signals() {
        let (handle, mut token) = CancelToken::pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn never_token_stays_pending() {
        let mut token = CancelToken::never();
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
        assert!(!token.is_cancelled());
    }
}
