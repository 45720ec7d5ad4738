//! Cargo-backed implementations of the test gate and build executor.

use std::path::Path;

use async_trait::async_trait;
use relay_core::{BuildExecutor, RelayError, Result, TargetSpec, TestGate, TestOutcome};
use tracing::info;

use crate::runner::CommandRunner;
use crate::stage::StageConfig;

const FAILURE_TAIL_LINES: usize = 20;

/// Runs the configured test command (by default
/// `cargo test --workspace --all-features`).
#[derive(Debug, Clone)]
pub struct CargoTestGate {
    command: Vec<String>,
    timeout_secs: u64,
}

impl CargoTestGate {
    pub fn new(command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            timeout_secs,
        }
    }
}

#[async_trait]
impl TestGate for CargoTestGate {
    async fn run_tests(&self, workspace: &Path) -> Result<TestOutcome> {
        let stage = StageConfig::test_suite(&self.command, workspace, self.timeout_secs);
        let result = CommandRunner::execute_stage(&stage).await?;
        info!(
            stage = %result.stage_name,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "test suite finished"
        );
        if result.passed() {
            Ok(TestOutcome::Pass)
        } else {
            Ok(TestOutcome::Fail {
                summary: format!(
                    "exit code {}: {}",
                    result.exit_code,
                    result.stderr_tail(FAILURE_TAIL_LINES)
                ),
            })
        }
    }
}

/// Runs the configured build command for one triple and reads the binary
/// from `<work_dir>/<triple>/release/`.
#[derive(Debug, Clone)]
pub struct CargoBuildExecutor {
    command: Vec<String>,
    tool_name: String,
    timeout_secs: u64,
}

impl CargoBuildExecutor {
    pub fn new(command: Vec<String>, tool_name: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            tool_name: tool_name.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl BuildExecutor for CargoBuildExecutor {
    async fn build(&self, target: &TargetSpec, workspace: &Path, work_dir: &Path) -> Result<Vec<u8>> {
        tokio::fs::create_dir_all(work_dir).await?;
        let stage = StageConfig::build_target(
            &self.command,
            &target.triple,
            workspace,
            work_dir,
            self.timeout_secs,
        );
        let result = CommandRunner::execute_stage(&stage).await.map_err(|e| RelayError::Build {
            target: target.triple.clone(),
            reason: e.to_string(),
        })?;
        if !result.passed() {
            return Err(RelayError::Build {
                target: target.triple.clone(),
                reason: format!(
                    "exit code {}: {}",
                    result.exit_code,
                    result.stderr_tail(FAILURE_TAIL_LINES)
                ),
            });
        }

        let binary_path = work_dir
            .join(&target.triple)
            .join("release")
            .join(target.binary_name(&self.tool_name));
        tokio::fs::read(&binary_path).await.map_err(|e| RelayError::Build {
            target: target.triple.clone(),
            reason: format!("cannot read {}: {e}", binary_path.display()),
        })
    }
}
