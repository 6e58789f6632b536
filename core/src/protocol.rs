//! Request/response types for the host boundary. The host speaks JSON, so
//! every shape here is explicit serde with validation on deserialization
//! rather than trusting caller-supplied structure.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// One terminal invocation. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalRunRequest {
    /// Argv tokens; token 0 is the executable. Never joined and reparsed
    /// by a shell.
    pub command: Vec<String>,

    /// The complete environment for the child. The ambient process
    /// environment is not inherited; callers wanting parts of it must
    /// layer them into this map themselves.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Clamped to the configured hard ceiling.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Per-stream byte cap override.
    #[serde(default)]
    pub max_output_bytes: Option<usize>,

    #[serde(default)]
    pub network: NetworkPolicy,
}

/// Network egress switch. No egress control is implemented, so requests
/// asking for `enabled` are denied outright; only the disabled default is
/// accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// Exactly one outcome per terminal request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Exit { code: i32 },
    Timeout,
    Denied { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalRunResult {
    pub stdout: String,
    pub stderr: String,
    pub outcome: TerminalOutcome,
    pub duration_ms: u64,
    /// True iff either stream hit its byte cap.
    pub truncated: bool,
}

impl TerminalRunResult {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            outcome: TerminalOutcome::Denied {
                reason: reason.into(),
            },
            duration_ms: 0,
            truncated: false,
        }
    }
}

/// One multi-file patch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePatchRequest {
    /// Raw patch text: a unified diff or a strict-DSL block.
    pub patch: String,

    /// Optimistic-concurrency precondition: relative path → expected
    /// SHA-256 (hex) of the file's current content.
    #[serde(default)]
    pub base_hashes: Option<HashMap<String, String>>,

    /// Apply against this root instead of the session's.
    #[serde(default)]
    pub workspace_override: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    /// Zero rejections.
    Ok,
    /// At least one file applied and at least one rejected.
    Partial,
    /// Zero files applied.
    Error,
}

/// A file operation that could not be applied. Rejections are always
/// surfaced to the caller, never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOp {
    pub path: String,
    pub reason: String,
}

/// Preview-only add/remove counts for one changed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangeStats {
    pub path: String,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePatchResult {
    pub status: PatchStatus,
    pub files_changed: Vec<String>,
    pub rejected_ops: Vec<RejectedOp>,
    /// Relative path → SHA-256 (hex) after the write.
    pub post_hashes: HashMap<String, String>,
    /// Present iff at least one file was mutated.
    pub checkpoint_id: Option<String>,
    pub diff_preview: Vec<FileChangeStats>,
}

/// Boundary shape for the restore operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub restored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RestoreOutcome {
    pub fn ok() -> Self {
        Self {
            restored: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            restored: false,
            error: Some(error.into()),
        }
    }
}
