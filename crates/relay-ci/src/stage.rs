//! Command definitions for the test gate and per-target builds.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A command to run as one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Working directory; inherits the process's when `None`.
    pub current_dir: Option<PathBuf>,

    /// Timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl StageConfig {
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            env: Vec::new(),
            current_dir: None,
            timeout_secs,
        }
    }

    /// The full test suite, run from the workspace root.
    pub fn test_suite(command: &[String], workspace: &Path, timeout_secs: u64) -> Self {
        Self::custom("test_gate", command.to_vec(), timeout_secs).in_dir(workspace)
    }

    /// A release build for one triple. `--target <triple>` is appended and
    /// `CARGO_TARGET_DIR` points at the target's private work directory.
    pub fn build_target(
        command: &[String],
        triple: &str,
        workspace: &Path,
        work_dir: &Path,
        timeout_secs: u64,
    ) -> Self {
        let mut command = command.to_vec();
        command.push("--target".to_string());
        command.push(triple.to_string());
        Self::custom(format!("build_{triple}"), command, timeout_secs)
            .in_dir(workspace)
            .with_env("CARGO_TARGET_DIR", &work_dir.to_string_lossy())
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}
