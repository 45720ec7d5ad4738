//! Domain types shared by every pipeline component.

pub mod artifact;
pub mod dispatch;
pub mod error;
pub mod merge;
pub mod run;
pub mod tag;
pub mod target;

pub use artifact::{archive_name, checksum_name, BuildArtifact};
pub use dispatch::{CredentialScope, DispatchEvent};
pub use error::{RelayError, Result};
pub use merge::{ChangeRequest, MergeDecision, SemverClass};
pub use run::{PipelineRunResult, RunState};
pub use tag::ReleaseTag;
pub use target::{partition_by_family, OsFamily, TargetSpec};
