//! File-patch runner: parse -> per-file validate -> apply -> snapshot ->
//! write -> hash. Files are validated and applied independently; one
//! rejection never aborts the rest of the request. Revertibility, not
//! cross-file atomicity, is the guarantee: everything written is covered
//! by a single checkpoint per request.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use guardrail_apply_patch::FileOpKind;
use guardrail_apply_patch::ParsedFileOp;
use guardrail_apply_patch::PatchError;
use guardrail_apply_patch::apply_chunks;
use guardrail_apply_patch::parse_patch;
use sha2::Digest;
use sha2::Sha256;
use similar::ChangeTag;
use similar::TextDiff;

use crate::checkpoint::CheckpointStore;
use crate::checkpoint::FileSnapshot;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::protocol::FileChangeStats;
use crate::protocol::FilePatchRequest;
use crate::protocol::FilePatchResult;
use crate::protocol::PatchStatus;
use crate::protocol::RejectedOp;
use crate::workspace::resolve_in_workspace;

/// Extensions refused outright, regardless of content. A default-safety
/// filter, not a content sniff.
const BINARY_EXTENSIONS: &[&str] = &[
    // Images.
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd",
    // Archives.
    "zip", "tar", "gz", "bz2", "xz", "zst", "7z", "rar", "jar",
    // Audio/video.
    "mp3", "mp4", "wav", "ogg", "flac", "avi", "mkv", "mov",
    // Fonts.
    "ttf", "otf", "woff", "woff2", "eot",
    // Executables and objects.
    "exe", "dll", "so", "dylib", "bin", "o", "a", "class", "pyc", "wasm",
    // Misc binary documents.
    "pdf", "sqlite", "db",
];

const SNIFF_LIMIT: usize = 8 * 1024;
const MAX_CONTROL_CHAR_RATIO: f64 = 0.05;

/// Apply one multi-file patch request against `workspace_root`.
/// Never returns an error; every failure lands in the result.
pub fn apply_file_patch(
    request: &FilePatchRequest,
    workspace_root: Option<&Path>,
    store: &CheckpointStore,
) -> FilePatchResult {
    let root = match request.workspace_override.as_deref().or(workspace_root) {
        Some(root) => root,
        None => {
            return whole_request_rejection(
                "no workspace root is configured for this session".to_string(),
            );
        }
    };

    let ops = match parse_patch(&request.patch) {
        Ok(ops) => ops,
        Err(err) => return whole_request_rejection(err.to_string()),
    };

    let mut outcome = PatchOutcome::default();
    for op in &ops {
        match apply_one_op(op, root, request.base_hashes.as_ref(), &mut outcome) {
            Ok(()) => {}
            Err(err) => {
                outcome.rejected.push(RejectedOp {
                    path: op.path.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    let checkpoint_id = if outcome.snapshots.is_empty() {
        None
    } else {
        match store.save(root, std::mem::take(&mut outcome.snapshots)) {
            Ok(id) => Some(id),
            Err(err) => {
                // The writes already happened; losing the checkpoint must
                // not turn a successful patch into a failure.
                tracing::error!("failed to persist checkpoint: {err}");
                None
            }
        }
    };

    let status = if outcome.rejected.is_empty() {
        PatchStatus::Ok
    } else if outcome.files_changed.is_empty() {
        PatchStatus::Error
    } else {
        PatchStatus::Partial
    };

    FilePatchResult {
        status,
        files_changed: outcome.files_changed,
        rejected_ops: outcome.rejected,
        post_hashes: outcome.post_hashes,
        checkpoint_id,
        diff_preview: outcome.diff_preview,
    }
}

fn whole_request_rejection(reason: String) -> FilePatchResult {
    FilePatchResult {
        status: PatchStatus::Error,
        files_changed: Vec::new(),
        rejected_ops: vec![RejectedOp {
            path: "*".to_string(),
            reason,
        }],
        post_hashes: HashMap::new(),
        checkpoint_id: None,
        diff_preview: Vec::new(),
    }
}

#[derive(Default)]
struct PatchOutcome {
    files_changed: Vec<String>,
    rejected: Vec<RejectedOp>,
    post_hashes: HashMap<String, String>,
    snapshots: Vec<FileSnapshot>,
    diff_preview: Vec<FileChangeStats>,
}

/// Validate and apply a single parsed operation. Any `Err` becomes a
/// per-file rejection in the caller.
fn apply_one_op(
    op: &ParsedFileOp,
    root: &Path,
    base_hashes: Option<&HashMap<String, String>>,
    outcome: &mut PatchOutcome,
) -> Result<()> {
    let target = resolve_in_workspace(root, Path::new(&op.path))?;
    reject_binary_extension(&target)?;

    let current = read_current(&target, op.is_new_file)?;

    if let Some(expected) = base_hashes.and_then(|hashes| hashes.get(&op.path)) {
        let actual = sha256_hex(current.as_deref().unwrap_or(&[]));
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(SandboxErr::HashMismatch(target));
        }
    }

    let current_text = current
        .as_deref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());

    match &op.kind {
        FileOpKind::Add { content } => {
            match &current_text {
                // Re-creating a file with identical content: nothing to
                // write, nothing to revert.
                Some(existing) if existing == content => return Ok(()),
                Some(_) => {
                    return Err(SandboxErr::ContextMismatch {
                        path: target,
                        detail: "file already exists with different content".to_string(),
                    });
                }
                None => {}
            }
            write_file(op, &target, content, None, outcome)?;
        }
        FileOpKind::Delete => {
            let Some(old_text) = current_text else {
                return Err(SandboxErr::NotFound(target));
            };
            outcome.snapshots.push(FileSnapshot::capture(&target)?);
            fs::remove_file(&target)?;
            outcome.files_changed.push(op.path.clone());
            outcome.diff_preview.push(FileChangeStats {
                path: op.path.clone(),
                additions: 0,
                deletions: old_text.lines().count(),
            });
        }
        FileOpKind::Update { chunks, move_path } => {
            let base = match (&current_text, op.is_new_file) {
                (Some(text), false) => text.clone(),
                (None, false) => return Err(SandboxErr::NotFound(target)),
                // New-file op: the base is empty whether or not the file
                // exists; a diverged existing file is caught below.
                (_, true) => String::new(),
            };
            let new_content = apply_chunks(&base, chunks).map_err(|err| match err {
                PatchError::ContextMismatch(detail) => SandboxErr::ContextMismatch {
                    path: target.clone(),
                    detail,
                },
                other => SandboxErr::InvalidRequest(other.to_string()),
            })?;

            if op.is_new_file
                && let Some(existing) = &current_text
                && existing != &new_content
            {
                return Err(SandboxErr::ContextMismatch {
                    path: target.clone(),
                    detail: "file already exists and does not match the patched content"
                        .to_string(),
                });
            }

            match move_path {
                Some(dest_rel) => {
                    let dest = resolve_in_workspace(root, Path::new(dest_rel))?;
                    reject_binary_extension(&dest)?;
                    outcome.snapshots.push(FileSnapshot::capture(&target)?);
                    outcome.snapshots.push(FileSnapshot::capture(&dest)?);
                    write_with_parents(&dest, &new_content)?;
                    fs::remove_file(&target)?;
                    record_change(dest_rel, &base, &new_content, outcome);
                }
                None => {
                    write_file(op, &target, &new_content, Some(&base), outcome)?;
                }
            }
        }
    }
    Ok(())
}

/// Snapshot, write and record one file's new content at its own path.
fn write_file(
    op: &ParsedFileOp,
    target: &Path,
    new_content: &str,
    old_content: Option<&str>,
    outcome: &mut PatchOutcome,
) -> Result<()> {
    outcome.snapshots.push(FileSnapshot::capture(target)?);
    write_with_parents(target, new_content)?;
    record_change(&op.path, old_content.unwrap_or(""), new_content, outcome);
    Ok(())
}

fn record_change(
    changed_rel_path: &str,
    old_content: &str,
    new_content: &str,
    outcome: &mut PatchOutcome,
) {
    outcome.files_changed.push(changed_rel_path.to_string());
    outcome
        .post_hashes
        .insert(changed_rel_path.to_string(), sha256_hex(new_content.as_bytes()));

    let diff = TextDiff::from_lines(old_content, new_content);
    let mut additions = 0;
    let mut deletions = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    outcome.diff_preview.push(FileChangeStats {
        path: changed_rel_path.to_string(),
        additions,
        deletions,
    });
}

fn write_with_parents(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Read the target's current bytes, allowing absence only for new-file
/// creations, and refuse binary-looking content even when the extension
/// passed the fixed list.
fn read_current(target: &Path, is_new_file: bool) -> Result<Option<Vec<u8>>> {
    match fs::read(target) {
        Ok(bytes) => {
            if looks_binary(&bytes) {
                return Err(SandboxErr::BinaryFile(target.to_path_buf()));
            }
            Ok(Some(bytes))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if is_new_file {
                Ok(None)
            } else {
                Err(SandboxErr::NotFound(target.to_path_buf()))
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn reject_binary_extension(path: &Path) -> Result<()> {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Ok(());
    };
    if BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return Err(SandboxErr::BinaryFile(path.to_path_buf()));
    }
    Ok(())
}

/// Null bytes, or a high ratio of non-printable non-whitespace control
/// characters in the first 8 KiB, mark a file as binary.
fn looks_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SNIFF_LIMIT)];
    if window.is_empty() {
        return false;
    }
    if window.contains(&0) {
        return true;
    }
    let control_chars = window
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t'))
        .count();
    (control_chars as f64 / window.len() as f64) > MAX_CONTROL_CHAR_RATIO
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
