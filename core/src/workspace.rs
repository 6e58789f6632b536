//! Workspace containment. Every relative path accepted from the agent
//! passes through [`resolve_in_workspace`] before any filesystem access.

use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;
use crate::error::SandboxErr;

/// Resolve `relative` against `root` and prove the result cannot escape
/// the root.
///
/// The path is joined onto the root, then the deepest *existing* ancestor
/// is canonicalized so symlinks are chased on the real path; any remaining
/// not-yet-existing components (new-file creation) are appended after
/// lexical normalization. The containment check runs against the
/// canonicalized root, so a symlink planted inside the workspace cannot
/// redirect a write outside it.
pub fn resolve_in_workspace(root: &Path, relative: &Path) -> Result<PathBuf> {
    if relative.as_os_str().is_empty() || relative.is_absolute() {
        return Err(SandboxErr::EscapesWorkspace(relative.to_path_buf()));
    }

    let root = root
        .canonicalize()
        .map_err(|_| SandboxErr::MissingWorkspaceRoot)?;
    let joined = root.join(relative);

    // Walk up to the deepest ancestor that exists and canonicalize it;
    // normalize the rest lexically. Existence is probed without following
    // symlinks: a dangling link must count as an existing component here,
    // or a link planted inside the workspace whose target does not exist
    // yet would be appended lexically and pass the prefix check while the
    // eventual write lands wherever the link points.
    let mut existing = joined.clone();
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    while fs::symlink_metadata(&existing).is_err() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                remainder.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Err(SandboxErr::EscapesWorkspace(relative.to_path_buf())),
        }
    }
    let mut resolved = match existing.canonicalize() {
        Ok(resolved) => resolved,
        // The deepest existing component is a symlink with no resolvable
        // target; it cannot be proven to stay inside the root.
        Err(_) if is_symlink(&existing) => {
            return Err(SandboxErr::EscapesWorkspace(relative.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    for name in remainder.iter().rev() {
        resolved.push(name);
    }
    let resolved = normalize_lexically(&resolved);

    if resolved == root || resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(SandboxErr::EscapesWorkspace(relative.to_path_buf()))
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// Remove `.` components and resolve `..` without touching the
/// filesystem. Only the not-yet-existing tail of a resolved path goes
/// through this; existing components have already been canonicalized.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
