//! Relay Core Library
//!
//! Release orchestration for a multi-target command-line tool: version
//! resolution, deterministic packaging, idempotent upload, the cross-family
//! dispatch gate, the dependency auto-merge policy, and the event router
//! that ties them to inbound triggers.

pub mod config;
pub mod dispatch_gate;
pub mod domain;
pub mod events;
pub mod merge_policy;
pub mod obs;
pub mod package;
pub mod telemetry;
pub mod toolchain;
pub mod upload;
pub mod version;

pub use config::{Credentials, ReleaseConfig, SecretToken};
pub use dispatch_gate::{DownstreamDispatchGate, Dispatcher, DryRunDispatcher, GateOutcome};
pub use domain::{
    archive_name, checksum_name, partition_by_family, BuildArtifact, ChangeRequest,
    CredentialScope, DispatchEvent, MergeDecision, OsFamily, PipelineRunResult, RelayError,
    ReleaseTag, Result, RunState, SemverClass, TargetSpec,
};
pub use events::{EventReport, EventRouter, InboundEvent, ReportDetail, RouterHandle, RunLauncher};
pub use merge_policy::{AutoMergePolicy, DryRunApprover, MergeApprover, MergeVerdict, MergeViolation};
pub use package::Packager;
pub use toolchain::{BuildExecutor, TestGate, TestOutcome};
pub use upload::{UploadedArtifact, Uploader};
pub use version::{resolve_for_trigger, resolve_manifest, resolve_manifest_str};
