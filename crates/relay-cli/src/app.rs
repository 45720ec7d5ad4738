//! Wires configuration, credentials and state into the relay components.
//!
//! Components are built on demand so that read-only commands work without
//! credentials. Tokens are required only by the components that use them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use relay_ci::{CargoBuildExecutor, CargoTestGate, PipelineDeps, PipelineLauncher};
use relay_core::{
    Credentials, Dispatcher, DownstreamDispatchGate, DryRunApprover, DryRunDispatcher,
    EventRouter, MergeApprover, ReleaseConfig, Uploader,
};
use relay_forge::{ForgeClient, ForgeConfig, GithubDispatcher, GithubMergeApprover, GithubReleases};
use relay_state::fakes::MemoryArtifactStore;
use relay_state::{ArtifactStore, FsGateStore, FsRunLedger, GateStore, RunLedger};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct AppOptions {
    /// Keep uploads in memory and log dispatches and merges instead of
    /// sending them.
    pub dry_run: bool,
}

pub struct RelayApp {
    pub config: ReleaseConfig,
    /// Directory relative config paths resolve against.
    pub workspace: PathBuf,
    credentials: Credentials,
    options: AppOptions,
    gate_store: Arc<dyn GateStore>,
    ledger: Arc<dyn RunLedger>,
}

impl RelayApp {
    /// Load `relay.toml` (with environment overrides) and open the state
    /// directory. The workspace is the directory holding the config file.
    pub fn load(config_path: &Path, options: AppOptions) -> Result<Self> {
        let config = ReleaseConfig::load(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;
        let workspace = match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::assemble(config, workspace, Credentials::from_env(), options)
    }

    pub fn assemble(
        config: ReleaseConfig,
        workspace: PathBuf,
        credentials: Credentials,
        options: AppOptions,
    ) -> Result<Self> {
        let state_dir = workspace.join(&config.state_dir);
        debug!(state_dir = %state_dir.display(), dry_run = options.dry_run, "opening state");
        let gate_store = FsGateStore::new(state_dir.join("gate"))
            .with_context(|| format!("Failed to open gate store in {}", state_dir.display()))?;
        let ledger = FsRunLedger::new(state_dir.join("runs"))
            .with_context(|| format!("Failed to open run ledger in {}", state_dir.display()))?;
        Ok(Self {
            config,
            workspace,
            credentials,
            options,
            gate_store: Arc::new(gate_store),
            ledger: Arc::new(ledger),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    pub fn ledger(&self) -> Arc<dyn RunLedger> {
        self.ledger.clone()
    }

    fn forge_client(&self, repository: &str, token: &relay_core::SecretToken) -> Result<ForgeClient> {
        ForgeClient::new(ForgeConfig::new(
            &self.config.forge.api_url,
            repository,
            token.clone(),
        ))
        .context("Failed to build forge client")
    }

    pub fn artifact_store(&self) -> Result<Arc<dyn ArtifactStore>> {
        if self.options.dry_run {
            return Ok(Arc::new(MemoryArtifactStore::new()));
        }
        let token = self.credentials.require_upload()?;
        let client = self.forge_client(&self.config.forge.repository, token)?;
        Ok(Arc::new(GithubReleases::new(client)))
    }

    pub fn dispatcher(&self) -> Result<Arc<dyn Dispatcher>> {
        if self.options.dry_run {
            return Ok(Arc::new(DryRunDispatcher));
        }
        let token = self.credentials.require_dispatch()?;
        let client = self.forge_client(&self.config.forge.repository, token)?;
        Ok(Arc::new(GithubDispatcher::new(client)))
    }

    pub fn approver(&self) -> Result<Arc<dyn MergeApprover>> {
        if self.options.dry_run {
            return Ok(Arc::new(DryRunApprover));
        }
        let token = self.credentials.require_upload()?;
        let client = self.forge_client(&self.config.forge.repository, token)?;
        Ok(Arc::new(GithubMergeApprover::new(client)))
    }

    /// Gate wired to `dispatcher`.
    pub fn gate_with(&self, dispatcher: Arc<dyn Dispatcher>) -> Result<DownstreamDispatchGate> {
        Ok(DownstreamDispatchGate::new(
            self.gate_store.clone(),
            dispatcher,
            self.config.required_families()?,
            self.config.downstream.repository.clone(),
            self.config.downstream.event_type.clone(),
        ))
    }

    pub fn gate(&self) -> Result<DownstreamDispatchGate> {
        self.gate_with(self.dispatcher()?)
    }

    /// Gate for inspection only; it cannot send anything.
    pub fn read_only_gate(&self) -> Result<DownstreamDispatchGate> {
        self.gate_with(Arc::new(DryRunDispatcher))
    }

    pub fn launcher(&self) -> Result<PipelineLauncher> {
        let toolchain = &self.config.toolchain;
        let deps = PipelineDeps {
            test_gate: Arc::new(CargoTestGate::new(
                toolchain.test_command.clone(),
                toolchain.timeout_secs,
            )),
            builder: Arc::new(CargoBuildExecutor::new(
                toolchain.build_command.clone(),
                self.config.tool_name.clone(),
                toolchain.timeout_secs,
            )),
            packager: PipelineLauncher::packager_for(&self.config, &self.workspace),
            uploader: Arc::new(Uploader::new(
                self.artifact_store()?,
                self.config.forge.create_release,
            )),
            ledger: self.ledger(),
        };
        PipelineLauncher::new(&self.config, &self.workspace, deps)
            .context("Failed to configure pipeline launcher")
    }

    pub fn router(&self, launcher: Arc<PipelineLauncher>) -> Result<EventRouter> {
        Ok(EventRouter::new(
            Arc::new(self.gate()?),
            launcher,
            self.config.merge_policy(),
            self.approver()?,
        ))
    }
}
