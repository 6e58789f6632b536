//! Parser for standard unified multi-file diffs.
//!
//! Output is the same [`Hunk`] list the strict-DSL parser produces, so a
//! single apply routine serves both formats. Hunks are applied by context
//! matching rather than by the line offsets in the `@@` headers, which
//! makes the apply step tolerant of slightly stale headers; the header is
//! still required to delimit hunks.

use crate::parser::Hunk;
use crate::parser::ParseError;
use crate::parser::UpdateFileChunk;

const OLD_FILE_MARKER: &str = "--- ";
const NEW_FILE_MARKER: &str = "+++ ";
const HUNK_HEADER_MARKER: &str = "@@";
const DEV_NULL: &str = "/dev/null";
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Parse `text` as a unified diff. Returns an empty vector when the text
/// contains no file sections at all, so the caller can fall back to the
/// strict DSL.
pub fn parse_unified_patch(text: &str) -> Result<Vec<Hunk>, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut hunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !lines[i].starts_with(OLD_FILE_MARKER) {
            // `diff --git`, `index`, mode lines and any surrounding prose
            // are ignored; only `---`/`+++` pairs delimit file sections.
            i += 1;
            continue;
        }
        let (hunk, consumed) = parse_file_section(&lines[i..], i + 1)?;
        hunks.push(hunk);
        i += consumed;
    }

    Ok(hunks)
}

/// Parse one `---`/`+++` section starting at `lines[0]`, returning the
/// hunk and the number of lines consumed.
fn parse_file_section(lines: &[&str], line_number: usize) -> Result<(Hunk, usize), ParseError> {
    let old_path = header_path(lines[0], OLD_FILE_MARKER);
    let Some(new_header) = lines.get(1).filter(|l| l.starts_with(NEW_FILE_MARKER)) else {
        return Err(ParseError::InvalidHunk {
            message: format!("expected '+++' after '{}'", lines[0]),
            line_number: line_number + 1,
        });
    };
    let new_path = header_path(new_header, NEW_FILE_MARKER);

    let mut chunks: Vec<UpdateFileChunk> = Vec::new();
    let mut consumed = 2;
    while consumed < lines.len() && lines[consumed].starts_with(HUNK_HEADER_MARKER) {
        let mut chunk = UpdateFileChunk {
            change_context: None,
            old_lines: Vec::new(),
            new_lines: Vec::new(),
            is_end_of_file: false,
        };
        consumed += 1;
        while consumed < lines.len() {
            let line = lines[consumed];
            if line == NO_NEWLINE_MARKER {
                consumed += 1;
                continue;
            }
            match line.chars().next() {
                // Some producers emit genuinely empty lines for empty
                // context lines.
                None => {
                    chunk.old_lines.push(String::new());
                    chunk.new_lines.push(String::new());
                }
                Some(' ') => {
                    chunk.old_lines.push(line[1..].to_string());
                    chunk.new_lines.push(line[1..].to_string());
                }
                Some('+') if !line.starts_with(NEW_FILE_MARKER) => {
                    chunk.new_lines.push(line[1..].to_string());
                }
                Some('-') if !line.starts_with(OLD_FILE_MARKER) => {
                    chunk.old_lines.push(line[1..].to_string());
                }
                _ => break,
            }
            consumed += 1;
        }
        if chunk.old_lines.is_empty() && chunk.new_lines.is_empty() {
            return Err(ParseError::InvalidHunk {
                message: "unified diff hunk has no body".to_string(),
                line_number: line_number + consumed - 1,
            });
        }
        chunks.push(chunk);
    }

    if chunks.is_empty() {
        return Err(ParseError::InvalidHunk {
            message: format!("no '@@' hunks found for file '{new_path}'"),
            line_number: line_number + 2,
        });
    }

    let is_creation =
        old_path == DEV_NULL || chunks.iter().all(|chunk| chunk.old_lines.is_empty());
    let hunk = if is_creation {
        let mut contents = String::new();
        for line in chunks.iter().flat_map(|chunk| &chunk.new_lines) {
            contents.push_str(line);
            contents.push('\n');
        }
        Hunk::AddFile {
            path: new_path,
            contents,
        }
    } else if new_path == DEV_NULL {
        Hunk::DeleteFile { path: old_path }
    } else if old_path != new_path {
        Hunk::UpdateFile {
            path: old_path,
            move_path: Some(new_path),
            chunks,
        }
    } else {
        Hunk::UpdateFile {
            path: old_path,
            move_path: None,
            chunks,
        }
    };
    Ok((hunk, consumed))
}

/// Extract the path from a `---`/`+++` header line, dropping an optional
/// timestamp after a tab and normalizing away the `a/`/`b/` prefixes so
/// the two sides of an ordinary edit compare equal.
fn header_path(line: &str, marker: &str) -> String {
    let raw = &line[marker.len()..];
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == DEV_NULL {
        return raw.to_string();
    }
    crate::normalize_diff_path(raw)
}
