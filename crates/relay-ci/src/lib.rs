//! Relay CI - per-family release pipeline runs
//!
//! Provides:
//! - The `PipelineRun` state machine (test gate, build fan-out, packaging, upload)
//! - Subprocess stages with timeouts
//! - Cargo-backed test gate and build executor
//! - A launcher that runs one pipeline per OS family

pub mod git;
pub mod launcher;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod toolchain;

// Re-export key types
pub use git::capture_head_sha;
pub use launcher::PipelineLauncher;
pub use pipeline::{
    CancelHandle, CancelToken, Pipeline, PipelineDeps, PipelineReport, PipelineRequest,
    PipelineRun, TargetFailure, Transition,
};
pub use runner::{CommandRunner, StageResult};
pub use stage::StageConfig;
pub use toolchain::{CargoBuildExecutor, CargoTestGate};
