//! Filesystem-backed gate store and run ledger.
//!
//! Layout under the state root:
//! - `cycles/<cycle>.json`: one [`CycleRecord`] per release cycle
//! - `runs/<run_id>.json`: one [`RunRecord`] per pipeline run
//! - `gate.lock`, `runs.lock`: advisory locks held for each read-modify-write
//!
//! The exclusive file lock makes record-and-check atomic across processes, so
//! notifications handled by separate `relay notify` invocations cannot both
//! fire a cycle. Writes go through a temp file and rename.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::gate_record::{CycleRecord, DispatchStatus, GateTransition, Observation};
use crate::storage_traits::*;

/// Exclusive advisory lock released on drop.
struct LockGuard {
    file: File,
}

impl LockGuard {
    fn acquire(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive().map_err(|e| StorageError::Lock {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Backend(format!("{} has no parent", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(value)?)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_all_json<T: DeserializeOwned>(dir: &Path) -> StorageResult<Vec<T>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(value) = read_json(&path)? {
            out.push(value);
        }
    }
    Ok(out)
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Backend(format!("storage task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// FsGateStore
// ---------------------------------------------------------------------------

/// Gate store persisted as JSON files, safe to share between processes.
#[derive(Debug, Clone)]
pub struct FsGateStore {
    root: PathBuf,
}

impl FsGateStore {
    /// Create a store rooted at `root`. Creates `root/cycles/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("cycles"))?;
        Ok(Self { root })
    }

    fn cycle_path(root: &Path, cycle: &str) -> PathBuf {
        root.join("cycles").join(format!("{cycle}.json"))
    }

    fn lock_path(root: &Path) -> PathBuf {
        root.join("gate.lock")
    }

    /// Run `f` against the cycle record under the exclusive lock and persist it.
    async fn update<T, F>(&self, cycle: &str, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut CycleRecord) -> StorageResult<T> + Send + 'static,
    {
        validate_key(cycle)?;
        let root = self.root.clone();
        let cycle = cycle.to_string();
        blocking(move || {
            let _guard = LockGuard::acquire(&Self::lock_path(&root))?;
            let path = Self::cycle_path(&root, &cycle);
            let mut record: CycleRecord =
                read_json(&path)?.unwrap_or_else(|| CycleRecord::new(&cycle, Utc::now()));
            let out = f(&mut record)?;
            write_json(&path, &record)?;
            debug!(cycle = %cycle, "gate record persisted");
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl GateStore for FsGateStore {
    async fn record(
        &self,
        cycle: &str,
        family: &str,
        observation: Observation,
        required: &BTreeSet<String>,
    ) -> StorageResult<GateTransition> {
        let family = family.to_string();
        let required = required.clone();
        self.update(cycle, move |record| {
            Ok(record.observe(&family, observation, &required))
        })
        .await
    }

    async fn claim_manual(&self, cycle: &str, operator: &str) -> StorageResult<CycleRecord> {
        let operator = operator.to_string();
        self.update(cycle, move |record| {
            record.claim_manual(&operator, Utc::now());
            Ok(record.clone())
        })
        .await
    }

    async fn set_dispatch_status(
        &self,
        cycle: &str,
        status: DispatchStatus,
    ) -> StorageResult<()> {
        validate_key(cycle)?;
        let root = self.root.clone();
        let cycle = cycle.to_string();
        blocking(move || {
            let _guard = LockGuard::acquire(&Self::lock_path(&root))?;
            let path = Self::cycle_path(&root, &cycle);
            let mut record: CycleRecord =
                read_json(&path)?.ok_or_else(|| StorageError::CycleNotFound {
                    cycle: cycle.clone(),
                })?;
            if !record.set_status(status, Utc::now()) {
                return Err(StorageError::Backend(format!(
                    "cycle {cycle} has no dispatch claim"
                )));
            }
            write_json(&path, &record)
        })
        .await
    }

    async fn get(&self, cycle: &str) -> StorageResult<Option<CycleRecord>> {
        validate_key(cycle)?;
        let path = Self::cycle_path(&self.root, cycle);
        blocking(move || read_json(&path)).await
    }

    async fn list(&self) -> StorageResult<Vec<CycleRecord>> {
        let dir = self.root.join("cycles");
        blocking(move || {
            let mut records: Vec<CycleRecord> = read_all_json(&dir)?;
            records.sort_by_key(|r| r.first_seen);
            Ok(records)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// FsRunLedger
// ---------------------------------------------------------------------------

/// Run ledger persisted as one JSON file per run.
#[derive(Debug, Clone)]
pub struct FsRunLedger {
    root: PathBuf,
}

impl FsRunLedger {
    /// Create a ledger rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("runs"))?;
        Ok(Self { root })
    }

    fn run_path(root: &Path, run_id: &RunId) -> PathBuf {
        root.join("runs").join(format!("{}.json", run_id.0))
    }
}

#[async_trait]
impl RunLedger for FsRunLedger {
    async fn start_run(&self, metadata: RunMetadata) -> StorageResult<RunId> {
        let root = self.root.clone();
        blocking(move || {
            let run_id = RunId::new();
            let record = RunRecord {
                run_id: run_id.clone(),
                metadata,
                conclusion: None,
                started_at: Utc::now(),
                finished_at: None,
            };
            write_json(&Self::run_path(&root, &run_id), &record)?;
            Ok(run_id)
        })
        .await
    }

    async fn finalize_run(
        &self,
        run_id: &RunId,
        conclusion: Conclusion,
    ) -> StorageResult<RunRecord> {
        validate_key(&run_id.0)?;
        let root = self.root.clone();
        let run_id = run_id.clone();
        blocking(move || {
            let _guard = LockGuard::acquire(&root.join("runs.lock"))?;
            let path = Self::run_path(&root, &run_id);
            let mut record: RunRecord =
                read_json(&path)?.ok_or_else(|| StorageError::RunNotFound {
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
            write_json(&path, &record)?;
            Ok(record)
        })
        .await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        validate_key(&run_id.0)?;
        let path = Self::run_path(&self.root, run_id);
        let id = run_id.0.clone();
        blocking(move || {
            read_json(&path)?.ok_or(StorageError::RunNotFound { run_id: id })
        })
        .await
    }

    async fn list_runs(&self, tag: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let dir = self.root.join("runs");
        let tag = tag.map(str::to_string);
        blocking(move || {
            let mut records: Vec<RunRecord> = read_all_json(&dir)?;
            records.retain(|r| tag.as_deref().map(|t| r.metadata.tag == t).unwrap_or(true));
            records.sort_by_key(|r| r.started_at);
            Ok(records)
        })
        .await
    }
}
