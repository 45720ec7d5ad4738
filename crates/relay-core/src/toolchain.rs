//! Seams to the compiler toolchain.
//!
//! The pipeline only knows these traits; `relay-ci` provides cargo-backed
//! implementations and tests substitute scripted fakes.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::domain::target::TargetSpec;

/// Outcome of the full test suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail { summary: String },
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Pass)
    }
}

/// Runs the project's test suite with all optional features enabled.
///
/// A `Fail` outcome is final for the run; implementations never retry.
/// `Err` is reserved for failures to run the suite at all.
#[async_trait]
pub trait TestGate: Send + Sync {
    async fn run_tests(&self, workspace: &Path) -> Result<TestOutcome>;
}

/// Builds the tool binary for one target.
///
/// Each call gets its own `work_dir`; builds of distinct targets share no
/// mutable state and may run concurrently.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn build(&self, target: &TargetSpec, workspace: &Path, work_dir: &Path)
        -> Result<Vec<u8>>;
}
