//! Byte-budgeted accumulation of a captured text stream.

pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Accumulates stream bytes up to a byte budget. Once the budget is
/// exhausted further input is discarded (the producer keeps being drained
/// by the caller to avoid back-pressure) and the finished text carries a
/// single truncation marker.
#[derive(Debug)]
pub struct OutputCap {
    buf: Vec<u8>,
    remaining: usize,
    truncated: bool,
}

impl OutputCap {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_bytes.min(8 * 1024)),
            remaining: max_bytes,
            truncated: false,
        }
    }

    /// Retain as much of `chunk` as the budget allows. A multi-byte UTF-8
    /// sequence that straddles the budget boundary is dropped whole, so
    /// the retained prefix always decodes cleanly.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if self.remaining == 0 {
            self.truncated = true;
            return;
        }

        if chunk.len() <= self.remaining {
            self.buf.extend_from_slice(chunk);
            self.remaining -= chunk.len();
            return;
        }

        let keep = whole_utf8_prefix_len(chunk, self.remaining);
        self.buf.extend_from_slice(&chunk[..keep]);
        self.remaining = 0;
        self.truncated = true;
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Finish the stream, appending the truncation marker at most once.
    pub fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Length of the longest prefix of `chunk`, at most `budget` bytes, that
/// ends on a UTF-8 sequence boundary.
fn whole_utf8_prefix_len(chunk: &[u8], budget: usize) -> usize {
    let mut end = budget.min(chunk.len());
    // A byte of the form 10xxxxxx is a continuation: if the cut lands on
    // one, back up until it lands on a lead (or ASCII) byte, dropping the
    // cut sequence whole.
    while end > 0 && end < chunk.len() && chunk[end] & 0b1100_0000 == 0b1000_0000 {
        end -= 1;
    }
    end
}
