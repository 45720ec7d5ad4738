//! Subprocess execution for pipeline stages.

use std::process::Stdio;
use std::time::{Duration, Instant};

use relay_core::{RelayError, Result};
use tokio::process::Command;
use tracing::debug;

use crate::stage::StageConfig;

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last lines of stderr, for failure summaries.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs stage commands as child processes.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a single stage and return the result.
    ///
    /// The child is killed if the returned future is dropped, so racing this
    /// against a cancellation signal stops the process.
    pub async fn execute_stage(config: &StageConfig) -> Result<StageResult> {
        let start = Instant::now();

        let (exe, args) = config.command.split_first().ok_or_else(|| {
            RelayError::Toolchain(format!("stage {} has empty command", config.name))
        })?;

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        debug!(stage = %config.name, command = ?config.command, "spawning stage");
        let child = command.spawn().map_err(|e| {
            RelayError::Toolchain(format!("cannot spawn {exe} for stage {}: {e}", config.name))
        })?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                RelayError::Toolchain(format!(
                    "stage {} timed out after {} seconds",
                    config.name, config.timeout_secs
                ))
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, parts: &[&str], timeout: u64) -> StageConfig {
        StageConfig::custom(
            name,
            parts.iter().map(|s| s.to_string()).collect(),
            timeout,
        )
    }

    #[test]
    fn stage_result_passed() {
        let result = StageResult {
            stage_name: "test_gate".to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 100,
            success: true,
        };
        assert!(result.passed());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let result = StageResult {
            stage_name: "build".to_string(),
            exit_code: 101,
            stdout: String::new(),
            stderr: "a\nb\nc\nd".to_string(),
            duration_ms: 1,
            success: false,
        };
        assert_eq!(result.stderr_tail(2), "c\nd");
        assert_eq!(result.stderr_tail(10), "a\nb\nc\nd");
    }

    #[tokio::test]
    async fn execute_simple_command() {
        let result = CommandRunner::execute_stage(&stage("echo", &["echo", "hello"], 60))
            .await
            .expect("execute failed");
        assert!(result.passed());
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn execute_failing_command() {
        let result = CommandRunner::execute_stage(&stage("false", &["false"], 60))
            .await
            .expect("execute failed");
        assert!(!result.passed());
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn env_and_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let config = stage("env", &["sh", "-c", "echo $RELAY_MARKER; pwd"], 60)
            .with_env("RELAY_MARKER", "marker-value")
            .in_dir(dir.path());
        let result = CommandRunner::execute_stage(&config).await.unwrap();
        assert!(result.stdout.contains("marker-value"));
        let leaf = dir.path().file_name().unwrap().to_str().unwrap();
        assert!(result.stdout.contains(leaf));
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let err = CommandRunner::execute_stage(&stage("sleep", &["sleep", "5"], 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn empty_command_rejected() {
        assert!(CommandRunner::execute_stage(&stage("none", &[], 1)).await.is_err());
    }
}
