//! The session-level entry point the host embeds. One [`Sandbox`] per
//! agent session, carrying the workspace root, the merged configuration
//! and the checkpoint store handle every operation goes through.

use std::path::Path;
use std::path::PathBuf;

use crate::checkpoint::CheckpointStore;
use crate::config::ConfigOverrides;
use crate::config::SandboxConfig;
use crate::exec::run_terminal;
use crate::patch::apply_file_patch;
use crate::protocol::FilePatchRequest;
use crate::protocol::FilePatchResult;
use crate::protocol::RestoreOutcome;
use crate::protocol::TerminalRunRequest;
use crate::protocol::TerminalRunResult;

pub struct Sandbox {
    workspace_root: Option<PathBuf>,
    config: SandboxConfig,
    checkpoints: CheckpointStore,
}

impl Sandbox {
    /// Build a sandbox for one session. `workspace_root` is the sole
    /// directory subtree commands and patches may touch; passing `None`
    /// leaves every operation denied until a root is configured.
    pub fn new(workspace_root: Option<PathBuf>, config: SandboxConfig) -> std::io::Result<Self> {
        let checkpoints = CheckpointStore::new(config.checkpoint_dir()?, config.max_checkpoints);
        Ok(Self {
            workspace_root,
            config,
            checkpoints,
        })
    }

    /// Like [`Sandbox::new`] with config loaded from `guardrail.toml`
    /// merged with `overrides`.
    pub fn with_overrides(
        workspace_root: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> std::io::Result<Self> {
        Self::new(workspace_root, SandboxConfig::load_with_overrides(overrides)?)
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run one terminal command under policy. Infallible at this boundary:
    /// every failure mode is a variant of the result.
    pub async fn run_terminal(&self, request: TerminalRunRequest) -> TerminalRunResult {
        run_terminal(request, self.workspace_root.as_deref(), &self.config).await
    }

    /// Apply one multi-file patch under policy, snapshotting every mutated
    /// file into a single checkpoint.
    pub fn apply_file_patch(&self, request: FilePatchRequest) -> FilePatchResult {
        apply_file_patch(&request, self.workspace_root.as_deref(), &self.checkpoints)
    }

    /// Revert one checkpoint. The record is consumed on success; restoring
    /// the same id twice reports it as expired.
    pub fn restore_checkpoint(&self, checkpoint_id: &str) -> RestoreOutcome {
        match self.checkpoints.restore_one(checkpoint_id) {
            Ok(()) => RestoreOutcome::ok(),
            Err(err) => {
                tracing::warn!("restore of checkpoint {checkpoint_id} failed: {err}");
                RestoreOutcome::failed(err.to_string())
            }
        }
    }

    /// Revert a batch of checkpoints, newest first. All records are loaded
    /// before any file is touched, so one missing id fails the whole batch
    /// with the workspace untouched.
    pub fn restore_checkpoints(&self, checkpoint_ids: &[String]) -> RestoreOutcome {
        match self.checkpoints.restore_many(checkpoint_ids) {
            Ok(()) => RestoreOutcome::ok(),
            Err(err) => {
                tracing::warn!("batch restore of {} checkpoints failed: {err}", checkpoint_ids.len());
                RestoreOutcome::failed(err.to_string())
            }
        }
    }
}
