//! Launches one pipeline run per OS family from the release configuration.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use relay_core::{
    partition_by_family, OsFamily, Packager, PipelineRunResult, ReleaseConfig, ReleaseTag, Result,
    RunLauncher, TargetSpec,
};
use tracing::debug;

use crate::pipeline::{CancelHandle, CancelToken, Pipeline, PipelineDeps, PipelineReport, PipelineRequest};

pub struct PipelineLauncher {
    deps: PipelineDeps,
    by_family: BTreeMap<OsFamily, Vec<TargetSpec>>,
    manifest_path: PathBuf,
    workspace: PathBuf,
    work_root: PathBuf,
    active: Mutex<HashMap<u64, CancelHandle>>,
    next_id: AtomicU64,
}

impl PipelineLauncher {
    /// Relative paths in `config` are resolved against `workspace`.
    pub fn new(config: &ReleaseConfig, workspace: &Path, deps: PipelineDeps) -> Result<Self> {
        Ok(Self {
            by_family: partition_by_family(&config.target_specs()?),
            manifest_path: workspace.join(&config.manifest_path),
            work_root: workspace.join(&config.work_dir),
            workspace: workspace.to_path_buf(),
            deps,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Packager configured from `config`, writing under `workspace`.
    pub fn packager_for(config: &ReleaseConfig, workspace: &Path) -> Packager {
        Packager::new(
            config.tool_name.clone(),
            config.archive_ext.clone(),
            workspace.join(&config.out_dir),
        )
    }

    pub fn targets(&self, family: OsFamily) -> &[TargetSpec] {
        self.by_family
            .get(&family)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Run one family and return the full report.
    pub async fn run_family(
        &self,
        family: OsFamily,
        pushed: Option<ReleaseTag>,
    ) -> Result<PipelineReport> {
        let request = PipelineRequest {
            family,
            targets: self.targets(family).to_vec(),
            manifest_path: self.manifest_path.clone(),
            workspace: self.workspace.clone(),
            work_root: self.work_root.clone(),
            pushed,
        };

        let (handle, token) = CancelToken::pair();
        let _active = ActiveRun::register(self, handle);
        Pipeline::execute(&self.deps, request, token).await
    }

    /// Cancel every run in flight. Each run observes its own token.
    pub fn cancel_all(&self) -> usize {
        let active = self.registry();
        for handle in active.values() {
            handle.cancel();
        }
        debug!(runs = active.len(), "cancelled in-flight runs");
        active.len()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<u64, CancelHandle>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Registry entry for one run; removed when the run future completes or is dropped.
struct ActiveRun<'a> {
    launcher: &'a PipelineLauncher,
    id: u64,
}

impl<'a> ActiveRun<'a> {
    fn register(launcher: &'a PipelineLauncher, handle: CancelHandle) -> Self {
        let id = launcher.next_id.fetch_add(1, Ordering::Relaxed);
        launcher.registry().insert(id, handle);
        Self { launcher, id }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.launcher.registry().remove(&self.id);
    }
}

#[async_trait]
impl RunLauncher for PipelineLauncher {
    fn families(&self) -> Vec<OsFamily> {
        self.by_family.keys().copied().collect()
    }

    async fn launch(&self, family: OsFamily, pushed: Option<ReleaseTag>) -> Result<PipelineRunResult> {
        Ok(self.run_family(family, pushed).await?.result)
    }
}
