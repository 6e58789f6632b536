use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxErr>;

/// Error taxonomy for the sandbox. Every variant carries a message fit to
/// show an end user; the patch and restore paths fold these into their
/// result objects (the terminal runner encodes its denials and timeouts
/// directly into `TerminalOutcome`), so nothing here ever crosses the
/// host boundary as a panic or an unhandled fault.
#[derive(Error, Debug)]
pub enum SandboxErr {
    /// No workspace root was configured for the session. Operations must
    /// never fall back to an ambient directory.
    #[error("no workspace root is configured for this session")]
    MissingWorkspaceRoot,

    /// A relative path resolved outside the workspace root.
    #[error("path '{0}' escapes the workspace")]
    EscapesWorkspace(PathBuf),

    /// The file a patch targets does not exist (and the op is not a
    /// new-file creation).
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// The target looks binary, by extension or by content sniff.
    #[error("refusing to patch binary file: {0}")]
    BinaryFile(PathBuf),

    /// The caller-supplied base hash no longer matches the file on disk.
    #[error("file changed since it was last read (hash mismatch): {0}")]
    HashMismatch(PathBuf),

    /// The patch's context lines could not be located in the file.
    #[error("context mismatch in {path}: {detail}")]
    ContextMismatch { path: PathBuf, detail: String },

    /// The checkpoint record is gone: consumed by an earlier restore or
    /// pruned.
    #[error("checkpoint {0} has expired or was already used")]
    CheckpointExpired(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
