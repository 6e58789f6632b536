//! Privileged action layer for an embedded coding agent: terminal command
//! execution and file patching, confined to a per-session workspace root,
//! gated by a command denylist, capped in output and wall-clock time, and
//! made revertible through per-request checkpoints.
//!
//! The two runner entry points ([`exec::run_terminal`] and
//! [`patch::apply_file_patch`]) are infallible at the host boundary:
//! every policy denial, timeout or per-file rejection is data in the
//! result object, never a panic or a propagated error.

// Library code must report through results and tracing, not the console.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod checkpoint;
mod config;
mod error;
mod exec;
mod output_cap;
mod patch;
mod policy;
mod protocol;
mod sandbox;
mod workspace;

pub use checkpoint::CheckpointStore;
pub use checkpoint::FileSnapshot;
pub use config::ConfigOverrides;
pub use config::HARD_TIMEOUT_MS;
pub use config::SandboxConfig;
pub use error::Result;
pub use error::SandboxErr;
pub use exec::run_terminal;
pub use output_cap::OutputCap;
pub use output_cap::TRUNCATION_MARKER;
pub use patch::apply_file_patch;
pub use policy::deny_reason;
pub use protocol::FileChangeStats;
pub use protocol::FilePatchRequest;
pub use protocol::FilePatchResult;
pub use protocol::NetworkPolicy;
pub use protocol::PatchStatus;
pub use protocol::RejectedOp;
pub use protocol::RestoreOutcome;
pub use protocol::TerminalOutcome;
pub use protocol::TerminalRunRequest;
pub use protocol::TerminalRunResult;
pub use sandbox::Sandbox;
pub use workspace::resolve_in_workspace;
