//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryArtifactStore`, `MemoryGateStore`, and `MemoryRunLedger`
//! that satisfy the trait contracts without any external dependencies.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::gate_record::{CycleRecord, DispatchStatus, GateTransition, Observation};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoredRelease {
    assets: BTreeMap<String, (ReleaseAsset, Vec<u8>)>,
}

/// In-memory release store backed by a `HashMap<tag, assets>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    releases: Mutex<HashMap<String, StoredRelease>>,
    read_only: bool,
    uploads: Mutex<u64>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose credential lacks write scope: every write fails.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Total number of successful `upload_asset` calls.
    pub fn upload_count(&self) -> u64 {
        *self.uploads.lock().unwrap()
    }

    fn deny(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::PermissionDenied {
                reason: "credential lacks contents:write scope".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn create_release(&self, tag: &str) -> StorageResult<()> {
        self.deny()?;
        let mut releases = self.releases.lock().unwrap();
        releases.entry(tag.to_string()).or_default();
        Ok(())
    }

    async fn release_exists(&self, tag: &str) -> StorageResult<bool> {
        Ok(self.releases.lock().unwrap().contains_key(tag))
    }

    async fn upload_asset(
        &self,
        tag: &str,
        name: &str,
        data: &[u8],
    ) -> StorageResult<UploadReceipt> {
        self.deny()?;
        let mut releases = self.releases.lock().unwrap();
        let release = releases
            .get_mut(tag)
            .ok_or_else(|| StorageError::ReleaseNotFound {
                tag: tag.to_string(),
            })?;
        let asset = ReleaseAsset {
            name: name.to_string(),
            size: data.len() as u64,
            digest: ContentDigest::from_bytes(data),
            uploaded_at: Utc::now(),
        };
        let replaced = release
            .assets
            .insert(name.to_string(), (asset.clone(), data.to_vec()))
            .is_some();
        *self.uploads.lock().unwrap() += 1;
        Ok(UploadReceipt {
            tag: tag.to_string(),
            asset,
            replaced,
        })
    }

    async fn list_assets(&self, tag: &str) -> StorageResult<Vec<ReleaseAsset>> {
        let releases = self.releases.lock().unwrap();
        let release = releases
            .get(tag)
            .ok_or_else(|| StorageError::ReleaseNotFound {
                tag: tag.to_string(),
            })?;
        Ok(release.assets.values().map(|(a, _)| a.clone()).collect())
    }

    async fn download_asset(&self, tag: &str, name: &str) -> StorageResult<Vec<u8>> {
        let releases = self.releases.lock().unwrap();
        let release = releases
            .get(tag)
            .ok_or_else(|| StorageError::ReleaseNotFound {
                tag: tag.to_string(),
            })?;
        release
            .assets
            .get(name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StorageError::AssetNotFound {
                tag: tag.to_string(),
                name: name.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryGateStore
// ---------------------------------------------------------------------------

/// In-memory gate store. The mutex is the single-writer discipline around
/// record-and-check.
#[derive(Debug, Default)]
pub struct MemoryGateStore {
    cycles: Mutex<BTreeMap<String, CycleRecord>>,
}

impl MemoryGateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GateStore for MemoryGateStore {
    async fn record(
        &self,
        cycle: &str,
        family: &str,
        observation: Observation,
        required: &BTreeSet<String>,
    ) -> StorageResult<GateTransition> {
        validate_key(cycle)?;
        let mut cycles = self.cycles.lock().unwrap();
        let record = cycles
            .entry(cycle.to_string())
            .or_insert_with(|| CycleRecord::new(cycle, observation.recorded_at));
        Ok(record.observe(family, observation, required))
    }

    async fn claim_manual(&self, cycle: &str, operator: &str) -> StorageResult<CycleRecord> {
        validate_key(cycle)?;
        let now = Utc::now();
        let mut cycles = self.cycles.lock().unwrap();
        let record = cycles
            .entry(cycle.to_string())
            .or_insert_with(|| CycleRecord::new(cycle, now));
        record.claim_manual(operator, now);
        Ok(record.clone())
    }

    async fn set_dispatch_status(
        &self,
        cycle: &str,
        status: DispatchStatus,
    ) -> StorageResult<()> {
        let mut cycles = self.cycles.lock().unwrap();
        let record = cycles
            .get_mut(cycle)
            .ok_or_else(|| StorageError::CycleNotFound {
                cycle: cycle.to_string(),
            })?;
        if !record.set_status(status, Utc::now()) {
            return Err(StorageError::Backend(format!(
                "cycle {cycle} has no dispatch claim"
            )));
        }
        Ok(())
    }

    async fn get(&self, cycle: &str) -> StorageResult<Option<CycleRecord>> {
        Ok(self.cycles.lock().unwrap().get(cycle).cloned())
    }

    async fn list(&self) -> StorageResult<Vec<CycleRecord>> {
        let cycles = self.cycles.lock().unwrap();
        let mut records: Vec<CycleRecord> = cycles.values().cloned().collect();
        records.sort_by_key(|r| r.first_seen);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryRunLedger
// ---------------------------------------------------------------------------

/// In-memory run ledger backed by a `HashMap<RunId, RunRecord>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunRecord>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn start_run(&self, metadata: RunMetadata) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let record = RunRecord {
            run_id: run_id.clone(),
            metadata,
            conclusion: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs.lock().unwrap().insert(run_id.0.clone(), record);
        Ok(run_id)
    }

    async fn finalize_run(
        &self,
        run_id: &RunId,
        conclusion: Conclusion,
    ) -> StorageResult<RunRecord> {
        let mut runs = self.runs.lock().unwrap();
        let record = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        if let Some(existing) = record.conclusion {
            return Err(StorageError::RunAlreadyFinalized {
                run_id: run_id.0.clone(),
                conclusion: existing.to_string(),
            });
        }
        record.conclusion = Some(conclusion);
        record.finished_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.runs
            .lock()
            .unwrap()
            .get(&run_id.0)
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn list_runs(&self, tag: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut records: Vec<RunRecord> = runs
            .values()
            .filter(|r| tag.map(|t| r.metadata.tag == t).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}
