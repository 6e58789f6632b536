//! Patch-text layer of the sandbox: parses agent-supplied patches in
//! either of two textual formats and applies parsed chunks to in-memory
//! file content. This crate never touches the filesystem; containment,
//! validation and writes are the caller's concern.

mod parser;
mod seek_sequence;
mod unified;

use thiserror::Error;

pub use parser::Hunk;
pub use parser::ParseError;
pub use parser::UpdateFileChunk;
pub use parser::parse_strict_patch;
pub use unified::parse_unified_patch;

#[derive(Debug, PartialEq, Error)]
pub enum PatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(
        "no recognized patch format found (expected a unified diff or a '*** Begin Patch' block)"
    )]
    UnrecognizedFormat,
    #[error("context mismatch: {0}")]
    ContextMismatch(String),
}

/// What a parsed operation does to its file.
#[derive(Debug, PartialEq)]
pub enum FileOpKind {
    Add {
        content: String,
    },
    Delete,
    Update {
        chunks: Vec<UpdateFileChunk>,
        move_path: Option<String>,
    },
}

/// One per-file operation extracted from a patch. Paths are normalized
/// relative paths (forward slashes, `a/`/`b/` diff prefixes stripped).
/// Consumed immediately by the patch runner; never persisted.
#[derive(Debug, PartialEq)]
pub struct ParsedFileOp {
    pub path: String,
    pub kind: FileOpKind,
    pub is_new_file: bool,
}

/// Parse patch text into an ordered list of per-file operations.
///
/// Two formats are accepted, first non-empty result wins: a standard
/// unified multi-file diff, then the strict patch DSL. A text that opens
/// with `*** Begin Patch` is committed to the DSL parser up front so that
/// `---`/`+++` lines inside its hunks cannot be misread as a unified diff.
pub fn parse_patch(text: &str) -> Result<Vec<ParsedFileOp>, PatchError> {
    if parser::looks_like_strict_patch(text) {
        let hunks = parse_strict_patch(text)?;
        return ops_from_hunks(hunks);
    }

    if let Ok(hunks) = parse_unified_patch(text)
        && !hunks.is_empty()
    {
        return ops_from_hunks(hunks);
    }

    match parse_strict_patch(text) {
        Ok(hunks) if !hunks.is_empty() => ops_from_hunks(hunks),
        _ => Err(PatchError::UnrecognizedFormat),
    }
}

fn ops_from_hunks(hunks: Vec<Hunk>) -> Result<Vec<ParsedFileOp>, PatchError> {
    if hunks.is_empty() {
        return Err(PatchError::UnrecognizedFormat);
    }
    let ops = hunks
        .into_iter()
        .map(|hunk| match hunk {
            Hunk::AddFile { path, contents } => ParsedFileOp {
                path: normalize_diff_path(&path),
                kind: FileOpKind::Add { content: contents },
                is_new_file: true,
            },
            Hunk::DeleteFile { path } => ParsedFileOp {
                path: normalize_diff_path(&path),
                kind: FileOpKind::Delete,
                is_new_file: false,
            },
            Hunk::UpdateFile {
                path,
                move_path,
                chunks,
            } => {
                // An update whose every chunk has an empty old side and no
                // anchor has nothing to match against: it describes the
                // file from an empty base, i.e. a creation.
                let is_new_file = chunks
                    .iter()
                    .all(|chunk| chunk.old_lines.is_empty() && chunk.change_context.is_none());
                ParsedFileOp {
                    path: normalize_diff_path(&path),
                    kind: FileOpKind::Update {
                        chunks,
                        move_path: move_path.map(|p| normalize_diff_path(&p)),
                    },
                    is_new_file,
                }
            }
        })
        .collect();
    Ok(ops)
}

/// Normalize a path as written in patch text: backslashes become forward
/// slashes, the conventional `a/`/`b/` diff prefixes and any leading `./`
/// are stripped.
pub(crate) fn normalize_diff_path(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");
    for prefix in ["a/", "b/", "./"] {
        if let Some(stripped) = path.strip_prefix(prefix) {
            path = stripped.to_string();
        }
    }
    path
}

/// Apply update chunks to `original`, returning the new content.
///
/// Chunks are located with [`seek_sequence`] (exact match first, then
/// whitespace-lenient retries) strictly in order, and replacements are
/// spliced back-to-front so earlier ones do not shift later offsets. Any
/// chunk that cannot be located fails the whole call; a single file's
/// hunks are never partially applied.
pub fn apply_chunks(original: &str, chunks: &[UpdateFileChunk]) -> Result<String, PatchError> {
    let mut original_lines: Vec<String> = original.split('\n').map(str::to_string).collect();
    // Drop the empty element produced by a trailing newline so line counts
    // match standard `diff` behaviour.
    if original_lines.last().is_some_and(String::is_empty) {
        original_lines.pop();
    }

    let replacements = compute_replacements(&original_lines, chunks)?;
    let mut new_lines = apply_replacements(original_lines, &replacements);
    if !new_lines.last().is_some_and(String::is_empty) {
        new_lines.push(String::new());
    }
    Ok(new_lines.join("\n"))
}

/// Compute `(start_index, old_len, new_lines)` splices that transform
/// `original_lines` according to `chunks`.
fn compute_replacements(
    original_lines: &[String],
    chunks: &[UpdateFileChunk],
) -> Result<Vec<(usize, usize, Vec<String>)>, PatchError> {
    let mut replacements: Vec<(usize, usize, Vec<String>)> = Vec::new();
    let mut line_index: usize = 0;

    for chunk in chunks {
        if let Some(ctx_line) = &chunk.change_context {
            match seek_sequence::seek_sequence(
                original_lines,
                std::slice::from_ref(ctx_line),
                line_index,
                false,
            ) {
                Some(idx) => line_index = idx + 1,
                None => {
                    return Err(PatchError::ContextMismatch(format!(
                        "failed to find context '{ctx_line}'"
                    )));
                }
            }
        }

        if chunk.old_lines.is_empty() {
            // Pure addition: directly after the anchor when one was
            // matched, otherwise at the end of the file (before a trailing
            // empty line if one exists).
            let insertion_idx = if chunk.change_context.is_some() {
                line_index
            } else if original_lines.last().is_some_and(String::is_empty) {
                original_lines.len() - 1
            } else {
                original_lines.len()
            };
            replacements.push((insertion_idx, 0, chunk.new_lines.clone()));
            continue;
        }

        // Diffs frequently represent the terminating newline of a replaced
        // region as a final empty old line. That sentinel is not present in
        // `original_lines`, so when a direct search fails retry without it.
        let mut pattern: &[String] = &chunk.old_lines;
        let mut new_slice: &[String] = &chunk.new_lines;
        let mut found = seek_sequence::seek_sequence(
            original_lines,
            pattern,
            line_index,
            chunk.is_end_of_file,
        );
        if found.is_none() && pattern.last().is_some_and(|s| s.is_empty()) {
            pattern = &pattern[..pattern.len() - 1];
            if new_slice.last().is_some_and(|s| s.is_empty()) {
                new_slice = &new_slice[..new_slice.len() - 1];
            }
            found = seek_sequence::seek_sequence(
                original_lines,
                pattern,
                line_index,
                chunk.is_end_of_file,
            );
        }

        match found {
            Some(start_idx) => {
                replacements.push((start_idx, pattern.len(), new_slice.to_vec()));
                line_index = start_idx + pattern.len();
            }
            None => {
                return Err(PatchError::ContextMismatch(format!(
                    "failed to find expected lines {:?}",
                    chunk.old_lines
                )));
            }
        }
    }

    Ok(replacements)
}

/// Splice replacements into `lines`, back to front.
fn apply_replacements(
    mut lines: Vec<String>,
    replacements: &[(usize, usize, Vec<String>)],
) -> Vec<String> {
    for (start_idx, old_len, new_segment) in replacements.iter().rev() {
        let end = (*start_idx + *old_len).min(lines.len());
        lines.splice(*start_idx..end, new_segment.iter().cloned());
    }
    lines
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn update_chunks(op: &ParsedFileOp) -> &[UpdateFileChunk] {
        match &op.kind {
            FileOpKind::Update { chunks, .. } => chunks,
            other => panic!("expected update op, got {other:?}"),
        }
    }

    #[test]
    fn strict_patch_is_detected_before_unified() {
        // The hunk body contains lines that look like unified-diff headers.
        let patch = "*** Begin Patch\n\
                     *** Update File: doc.md\n\
                     @@\n\
                     -+++ old heading\n\
                     ++++ new heading\n\
                     *** End Patch";
        let ops = parse_patch(patch).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path, "doc.md");
    }

    #[test]
    fn unified_diff_paths_are_normalized() {
        let diff = "--- a/dir\\sub\\file.txt\n\
                    +++ b/dir\\sub\\file.txt\n\
                    @@ -1 +1 @@\n\
                    -x\n\
                    +y\n";
        let ops = parse_patch(diff).unwrap();
        assert_eq!(ops[0].path, "dir/sub/file.txt");
        assert!(!ops[0].is_new_file);
    }

    #[test]
    fn unrecognized_text_is_a_single_error() {
        assert_eq!(
            parse_patch("not a patch at all\n"),
            Err(PatchError::UnrecognizedFormat)
        );
    }

    #[test]
    fn dsl_update_with_only_additions_is_new_file() {
        let patch = "*** Begin Patch\n\
                     *** Update File: a.txt\n\
                     @@\n\
                     +hello\n\
                     +world\n\
                     *** End Patch";
        let ops = parse_patch(patch).unwrap();
        assert!(ops[0].is_new_file);
        let content = apply_chunks("", update_chunks(&ops[0])).unwrap();
        assert_eq!(content, "hello\nworld\n");
    }

    #[test]
    fn dsl_update_with_anchor_is_not_new_file() {
        let patch = "*** Begin Patch\n\
                     *** Update File: a.txt\n\
                     @@ fn main\n\
                     +inserted\n\
                     *** End Patch";
        let ops = parse_patch(patch).unwrap();
        assert!(!ops[0].is_new_file);
    }

    #[test]
    fn apply_chunks_round_trips_a_simple_replacement() {
        let chunks = vec![UpdateFileChunk {
            change_context: None,
            old_lines: vec!["foo".into(), "bar".into()],
            new_lines: vec!["foo".into(), "baz".into()],
            is_end_of_file: false,
        }];
        assert_eq!(apply_chunks("foo\nbar\n", &chunks).unwrap(), "foo\nbaz\n");
    }

    #[test]
    fn apply_chunks_rejects_unmatched_context() {
        let chunks = vec![UpdateFileChunk {
            change_context: None,
            old_lines: vec!["never there".into()],
            new_lines: vec!["x".into()],
            is_end_of_file: false,
        }];
        match apply_chunks("foo\nbar\n", &chunks) {
            Err(PatchError::ContextMismatch(_)) => {}
            other => panic!("expected context mismatch, got {other:?}"),
        }
    }

    #[test]
    fn apply_chunks_applies_interleaved_edits_in_order() {
        let patch = "*** Begin Patch\n\
                     *** Update File: f\n\
                     @@\n \
                     a\n\
                     -b\n\
                     +B\n\
                     @@\n \
                     d\n\
                     -e\n\
                     +E\n\
                     @@\n \
                     f\n\
                     +g\n\
                     *** End of File\n\
                     *** End Patch";
        let ops = parse_patch(patch).unwrap();
        let content = apply_chunks("a\nb\nc\nd\ne\nf\n", update_chunks(&ops[0])).unwrap();
        assert_eq!(content, "a\nB\nc\nd\nE\nf\ng\n");
    }

    #[test]
    fn anchored_pure_addition_inserts_after_the_anchor() {
        let chunks = vec![UpdateFileChunk {
            change_context: Some("fn one".into()),
            old_lines: vec![],
            new_lines: vec!["inserted".into()],
            is_end_of_file: false,
        }];
        let original = "fn one\nbody1\nfn two\nbody2\n";
        assert_eq!(
            apply_chunks(original, &chunks).unwrap(),
            "fn one\ninserted\nbody1\nfn two\nbody2\n"
        );
    }

    #[test]
    fn unanchored_pure_addition_appends_at_end_of_file() {
        let chunks = vec![UpdateFileChunk {
            change_context: None,
            old_lines: vec![],
            new_lines: vec!["appended".into()],
            is_end_of_file: false,
        }];
        assert_eq!(
            apply_chunks("a\nb\n", &chunks).unwrap(),
            "a\nb\nappended\n"
        );
    }

    #[test]
    fn apply_chunks_honors_anchored_contexts_in_file_order() {
        let chunks = vec![
            UpdateFileChunk {
                change_context: Some("fn one".into()),
                old_lines: vec!["    1".into()],
                new_lines: vec!["    one".into()],
                is_end_of_file: false,
            },
            UpdateFileChunk {
                change_context: Some("fn two".into()),
                old_lines: vec!["    2".into()],
                new_lines: vec!["    two".into()],
                is_end_of_file: false,
            },
        ];
        let original = "fn one\n    1\nfn two\n    2\n";
        assert_eq!(
            apply_chunks(original, &chunks).unwrap(),
            "fn one\n    one\nfn two\n    two\n"
        );
    }

    #[test]
    fn apply_unified_diff_round_trip() {
        // A diff produced from (old, new) takes old to new.
        let old = "one\ntwo\nthree\nfour\n";
        let diff = "--- a/n.txt\n\
                    +++ b/n.txt\n\
                    @@ -1,4 +1,4 @@\n \
                    one\n\
                    -two\n\
                    +TWO\n \
                    three\n \
                    four\n";
        let ops = parse_patch(diff).unwrap();
        let new = apply_chunks(old, update_chunks(&ops[0])).unwrap();
        assert_eq!(new, "one\nTWO\nthree\nfour\n");

        // The same diff against diverged content is a context mismatch,
        // never a corrupted write.
        assert!(matches!(
            apply_chunks("totally\ndifferent\n", update_chunks(&ops[0])),
            Err(PatchError::ContextMismatch(_))
        ));
    }
}
