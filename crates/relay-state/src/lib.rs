//! Relay-State: persistence layer for Release Relay
//!
//! Everything the release pipeline must remember lives behind a trait here:
//!
//! - `ArtifactStore`: release objects keyed by tag, assets with clobber semantics
//! - `GateStore`: per-cycle family conclusions with atomic record-and-check
//! - `RunLedger`: pipeline run results, finalized exactly once
//!
//! In-memory fakes live in [`fakes`]; [`FsGateStore`] and [`FsRunLedger`]
//! persist to a state directory and are safe to share between processes.

mod error;
pub mod fakes;
mod fs_store;
pub mod gate_record;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::{FsGateStore, FsRunLedger};
pub use gate_record::{
    CycleRecord, DispatchMark, DispatchStatus, DispatchTrigger, GateTransition, Observation,
};
pub use storage_traits::{
    validate_key, ArtifactStore, Conclusion, ContentDigest, GateStore, ReleaseAsset, RunId,
    RunLedger, RunMetadata, RunRecord, StorageResult, UploadReceipt,
};
