//! Parser for the strict patch DSL.
//!
//! The grammar, transcribed from the format the agent is prompted to emit:
//!
//! start: begin_patch hunk+ end_patch
//! begin_patch: "*** Begin Patch" LF
//! end_patch: "*** End Patch" LF?
//!
//! hunk: add_hunk | delete_hunk | update_hunk
//! add_hunk: "*** Add File: " filename LF add_line+
//! delete_hunk: "*** Delete File: " filename LF
//! update_hunk: "*** Update File: " filename LF change_move? change?
//! add_line: "+" /(.*)/ LF
//!
//! change_move: "*** Move to: " filename LF
//! change: (change_context | change_line)+ eof_line?
//! change_context: ("@@" | "@@ " /(.+)/) LF
//! change_line: ("+" | "-" | " ") /(.*)/ LF
//! eof_line: "*** End of File" LF
//!
//! Parsing validates structure only; whether the hunks can actually be
//! applied to a file is decided later.

use thiserror::Error;

const BEGIN_PATCH_MARKER: &str = "*** Begin Patch";
const END_PATCH_MARKER: &str = "*** End Patch";
const ADD_FILE_MARKER: &str = "*** Add File: ";
const DELETE_FILE_MARKER: &str = "*** Delete File: ";
const UPDATE_FILE_MARKER: &str = "*** Update File: ";
const MOVE_TO_MARKER: &str = "*** Move to: ";
const EOF_MARKER: &str = "*** End of File";
const CHANGE_CONTEXT_MARKER: &str = "@@ ";
const EMPTY_CHANGE_CONTEXT_MARKER: &str = "@@";

#[derive(Debug, PartialEq, Error)]
pub enum ParseError {
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    #[error("invalid hunk at line {line_number}, {message}")]
    InvalidHunk { message: String, line_number: usize },
}
use ParseError::*;

/// One file-level section of a strict-DSL patch.
#[derive(Debug, PartialEq)]
pub enum Hunk {
    AddFile {
        path: String,
        contents: String,
    },
    DeleteFile {
        path: String,
    },
    UpdateFile {
        path: String,
        move_path: Option<String>,
        /// Chunks are ordered: each one's anchor must occur later in the
        /// file than the previous chunk's match.
        chunks: Vec<UpdateFileChunk>,
    },
}
use Hunk::*;

/// A contiguous replacement inside an update hunk.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateFileChunk {
    /// A single anchor line narrowing down where the chunk applies (usually
    /// a function or type definition). Must occur before `old_lines`.
    pub change_context: Option<String>,

    /// Lines to be replaced by `new_lines`. Context lines appear in both.
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,

    /// When set, `old_lines` must match at the end of the file.
    pub is_end_of_file: bool,
}

/// Whether `text` even claims to be a strict-DSL patch. Used to pick a
/// parser before committing to one; a text that opens with the begin
/// marker but fails to parse should surface the DSL error rather than be
/// fed to the unified-diff parser.
pub fn looks_like_strict_patch(text: &str) -> bool {
    text.trim_start().starts_with(BEGIN_PATCH_MARKER)
}

pub fn parse_strict_patch(patch: &str) -> Result<Vec<Hunk>, ParseError> {
    let lines: Vec<&str> = patch.trim().lines().collect();
    if lines.first() != Some(&BEGIN_PATCH_MARKER) {
        return Err(InvalidPatch(String::from(
            "the first line of the patch must be '*** Begin Patch'",
        )));
    }
    let last = lines.len() - 1;
    if lines[last] != END_PATCH_MARKER {
        return Err(InvalidPatch(String::from(
            "the last line of the patch must be '*** End Patch'",
        )));
    }

    let mut hunks: Vec<Hunk> = Vec::new();
    let mut remaining = &lines[1..last];
    let mut line_number = 2;
    while !remaining.is_empty() {
        let (hunk, consumed) = parse_one_hunk(remaining, line_number)?;
        hunks.push(hunk);
        line_number += consumed;
        remaining = &remaining[consumed..];
    }
    Ok(hunks)
}

/// Parse a single hunk from the front of `lines`, returning it together
/// with the number of lines consumed.
fn parse_one_hunk(lines: &[&str], line_number: usize) -> Result<(Hunk, usize), ParseError> {
    // Tolerate stray padding around the marker itself.
    let first_line = lines[0].trim();

    if let Some(path) = first_line.strip_prefix(ADD_FILE_MARKER) {
        let mut contents = String::new();
        let mut consumed = 1;
        for line in &lines[1..] {
            let Some(added) = line.strip_prefix('+') else {
                break;
            };
            contents.push_str(added);
            contents.push('\n');
            consumed += 1;
        }
        return Ok((
            AddFile {
                path: path.to_string(),
                contents,
            },
            consumed,
        ));
    }

    if let Some(path) = first_line.strip_prefix(DELETE_FILE_MARKER) {
        return Ok((
            DeleteFile {
                path: path.to_string(),
            },
            1,
        ));
    }

    if let Some(path) = first_line.strip_prefix(UPDATE_FILE_MARKER) {
        let mut remaining = &lines[1..];
        let mut consumed = 1;

        let move_path = remaining
            .first()
            .and_then(|line| line.strip_prefix(MOVE_TO_MARKER));
        if move_path.is_some() {
            remaining = &remaining[1..];
            consumed += 1;
        }

        let mut chunks = Vec::new();
        while !remaining.is_empty() {
            // Blank separator lines between chunks carry no content.
            if remaining[0].trim().is_empty() {
                consumed += 1;
                remaining = &remaining[1..];
                continue;
            }
            // The next `***` marker begins the next hunk.
            if remaining[0].starts_with("***") {
                break;
            }

            let (chunk, chunk_lines) =
                parse_update_chunk(remaining, line_number + consumed, chunks.is_empty())?;
            chunks.push(chunk);
            consumed += chunk_lines;
            remaining = &remaining[chunk_lines..];
        }

        if chunks.is_empty() {
            return Err(InvalidHunk {
                message: format!("update hunk for path '{path}' is empty"),
                line_number,
            });
        }

        return Ok((
            UpdateFile {
                path: path.to_string(),
                move_path: move_path.map(str::to_string),
                chunks,
            },
            consumed,
        ));
    }

    Err(InvalidHunk {
        message: format!(
            "'{first_line}' is not a valid hunk header. Valid hunk headers: '*** Add File: {{path}}', '*** Delete File: {{path}}', '*** Update File: {{path}}'"
        ),
        line_number,
    })
}

fn parse_update_chunk(
    lines: &[&str],
    line_number: usize,
    allow_missing_context: bool,
) -> Result<(UpdateFileChunk, usize), ParseError> {
    if lines.is_empty() {
        return Err(InvalidHunk {
            message: "update hunk does not contain any lines".to_string(),
            line_number,
        });
    }

    // An explicit `@@` or `@@ <anchor>` marker is consumed here; the very
    // first chunk of a hunk may instead begin directly with diff lines.
    let (change_context, body_start) = if lines[0] == EMPTY_CHANGE_CONTEXT_MARKER {
        (None, 1)
    } else if let Some(context) = lines[0].strip_prefix(CHANGE_CONTEXT_MARKER) {
        (Some(context.to_string()), 1)
    } else if allow_missing_context {
        (None, 0)
    } else {
        return Err(InvalidHunk {
            message: format!(
                "expected update hunk to start with a @@ context marker, got: '{}'",
                lines[0]
            ),
            line_number,
        });
    };
    if body_start >= lines.len() {
        return Err(InvalidHunk {
            message: "update hunk does not contain any lines".to_string(),
            line_number: line_number + 1,
        });
    }

    let mut chunk = UpdateFileChunk {
        change_context,
        old_lines: Vec::new(),
        new_lines: Vec::new(),
        is_end_of_file: false,
    };
    let mut body_lines = 0;
    for line in &lines[body_start..] {
        if *line == EOF_MARKER {
            if body_lines == 0 {
                return Err(InvalidHunk {
                    message: "update hunk does not contain any lines".to_string(),
                    line_number: line_number + 1,
                });
            }
            chunk.is_end_of_file = true;
            body_lines += 1;
            break;
        }

        match line.chars().next() {
            // A completely empty line stands for an empty context line.
            None => {
                chunk.old_lines.push(String::new());
                chunk.new_lines.push(String::new());
            }
            Some(' ') => {
                chunk.old_lines.push(line[1..].to_string());
                chunk.new_lines.push(line[1..].to_string());
            }
            Some('+') => {
                chunk.new_lines.push(line[1..].to_string());
            }
            Some('-') => {
                chunk.old_lines.push(line[1..].to_string());
            }
            _ => {
                if body_lines == 0 {
                    return Err(InvalidHunk {
                        message: format!(
                            "unexpected line found in update hunk: '{line}'. Every line should start with ' ' (context line), '+' (added line), or '-' (removed line)"
                        ),
                        line_number: line_number + 1,
                    });
                }
                // Anything else begins the next chunk.
                break;
            }
        }
        body_lines += 1;
    }

    Ok((chunk, body_lines + body_start))
}
