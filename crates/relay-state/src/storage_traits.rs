//! Storage trait definitions for Release Relay
//!
//! These traits define the persistence seams of the release pipeline:
//! - `ArtifactStore`: release objects keyed by tag, with named assets
//! - `GateStore`: per-cycle family conclusions with an atomic record-and-check
//! - `RunLedger`: pipeline run results, finalized exactly once
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;
use crate::gate_record::{CycleRecord, DispatchStatus, GateTransition, Observation};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal conclusion of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
}

impl Conclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Conclusion::Success)
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Conclusion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Conclusion::Success),
            "failure" | "failed" => Ok(Conclusion::Failure),
            "cancelled" | "canceled" => Ok(Conclusion::Cancelled),
            other => Err(format!("unknown conclusion: {other}")),
        }
    }
}

/// Reject keys that cannot double as file names.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let ok = !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// ArtifactStore: release objects and their assets
// ---------------------------------------------------------------------------

/// One named asset attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub size: u64,
    pub digest: ContentDigest,
    pub uploaded_at: DateTime<Utc>,
}

/// What an upload did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub tag: String,
    pub asset: ReleaseAsset,
    /// `true` when an existing asset of the same name was overwritten.
    pub replaced: bool,
}

/// Release artifact storage keyed by tag.
///
/// Guarantees:
/// - `upload_asset` overwrites a same-named asset (clobber semantics); it
///   never errors on a name conflict.
/// - A release holds at most one asset per name.
/// - `upload_asset` fails with `ReleaseNotFound` when no release exists for
///   the tag, and with `PermissionDenied` when the credential cannot write.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create the release object for a tag. No-op if it already exists.
    async fn create_release(&self, tag: &str) -> StorageResult<()>;

    /// Whether a release object exists for the tag.
    async fn release_exists(&self, tag: &str) -> StorageResult<bool>;

    /// Attach bytes under `name`, replacing any asset with the same name.
    async fn upload_asset(&self, tag: &str, name: &str, data: &[u8])
        -> StorageResult<UploadReceipt>;

    /// List assets of a release, sorted by name.
    async fn list_assets(&self, tag: &str) -> StorageResult<Vec<ReleaseAsset>>;

    /// Fetch an asset's bytes.
    async fn download_asset(&self, tag: &str, name: &str) -> StorageResult<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// GateStore: per-cycle conclusions for the dispatch gate
// ---------------------------------------------------------------------------

/// Keyed store of release-cycle records.
///
/// Guarantees:
/// - `record` appends the observation and evaluates the conjunction in one
///   critical section; at most one caller ever receives `GateTransition::Fire`
///   for a cycle.
/// - `claim_manual` marks the cycle dispatched unconditionally.
#[async_trait]
pub trait GateStore: Send + Sync {
    /// Record a family's conclusion for a cycle and evaluate the gate.
    async fn record(
        &self,
        cycle: &str,
        family: &str,
        observation: Observation,
        required: &BTreeSet<String>,
    ) -> StorageResult<GateTransition>;

    /// Mark a cycle as dispatched by an operator, creating it if needed.
    async fn claim_manual(&self, cycle: &str, operator: &str) -> StorageResult<CycleRecord>;

    /// Record the outcome of the dispatch call for a claimed cycle.
    async fn set_dispatch_status(&self, cycle: &str, status: DispatchStatus)
        -> StorageResult<()>;

    /// Fetch a cycle record.
    async fn get(&self, cycle: &str) -> StorageResult<Option<CycleRecord>>;

    /// All cycle records, oldest first.
    async fn list(&self) -> StorageResult<Vec<CycleRecord>>;
}

// ---------------------------------------------------------------------------
// RunLedger: pipeline run results
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata captured when a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// OS family built by this run
    pub family: String,
    /// Release tag (display form)
    pub tag: String,
    /// Commit SHA being released, when known
    pub commit_sha: Option<String>,
    /// Target triples in the family
    pub targets: Vec<String>,
}

/// Full run record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    /// `None` while the run is in flight.
    pub conclusion: Option<Conclusion>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn is_finalized(&self) -> bool {
        self.conclusion.is_some()
    }
}

/// Pipeline run ledger.
///
/// Guarantees:
/// - A run is created once and finalized exactly once.
/// - Finalized runs are immutable; a second `finalize_run` fails with
///   `RunAlreadyFinalized`.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Create a new in-flight run.
    async fn start_run(&self, metadata: RunMetadata) -> StorageResult<RunId>;

    /// Record the terminal conclusion of a run.
    async fn finalize_run(&self, run_id: &RunId, conclusion: Conclusion)
        -> StorageResult<RunRecord>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// List runs, optionally filtered by tag, oldest first.
    async fn list_runs(&self, tag: Option<&str>) -> StorageResult<Vec<RunRecord>>;
}
