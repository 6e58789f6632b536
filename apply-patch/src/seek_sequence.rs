/// Locate `pattern` within `lines`, starting at or after `start`.
///
/// Matching is attempted with decreasing strictness: exact equality first,
/// then ignoring trailing whitespace, then ignoring whitespace on both
/// sides. When `eof` is set the search is first anchored at the end of the
/// input, so chunks that are meant to touch the end of a file land there
/// even if the same lines also occur earlier.
///
/// An empty `pattern` matches trivially at `start`; a pattern longer than
/// the remaining input can never match.
pub(crate) fn seek_sequence(
    lines: &[String],
    pattern: &[String],
    start: usize,
    eof: bool,
) -> Option<usize> {
    if pattern.is_empty() {
        return Some(start);
    }
    if pattern.len() > lines.len() {
        return None;
    }

    let last_candidate = lines.len() - pattern.len();

    let passes: [fn(&str, &str) -> bool; 3] = [
        |a, b| a == b,
        |a, b| a.trim_end() == b.trim_end(),
        |a, b| a.trim() == b.trim(),
    ];
    let matches_at = |i: usize, equal: fn(&str, &str) -> bool| {
        pattern
            .iter()
            .enumerate()
            .all(|(j, pat)| equal(&lines[i + j], pat))
    };

    if eof {
        for equal in passes {
            if matches_at(last_candidate, equal) {
                return Some(last_candidate);
            }
        }
        // Fall through to an ordinary scan when nothing matches at the
        // end, so a stale end-of-file marker degrades gracefully.
    }

    for equal in passes {
        for i in start..=last_candidate {
            if matches_at(i, equal) {
                return Some(i);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::seek_sequence;

    fn lines(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_finds_sequence() {
        let haystack = lines(&["fn main() {", "    body", "}"]);
        assert_eq!(
            seek_sequence(&haystack, &lines(&["    body", "}"]), 0, false),
            Some(1)
        );
    }

    #[test]
    fn trailing_whitespace_is_forgiven() {
        let haystack = lines(&["alpha   ", "beta\t"]);
        assert_eq!(
            seek_sequence(&haystack, &lines(&["alpha", "beta"]), 0, false),
            Some(0)
        );
    }

    #[test]
    fn leading_whitespace_is_forgiven_last() {
        let haystack = lines(&["  alpha", "  beta"]);
        assert_eq!(
            seek_sequence(&haystack, &lines(&["alpha", "beta"]), 0, false),
            Some(0)
        );
    }

    #[test]
    fn start_offset_skips_earlier_occurrences() {
        let haystack = lines(&["x", "y", "x", "y"]);
        assert_eq!(
            seek_sequence(&haystack, &lines(&["x", "y"]), 1, false),
            Some(2)
        );
    }

    #[test]
    fn eof_anchors_at_end_of_input() {
        let haystack = lines(&["x", "x"]);
        assert_eq!(seek_sequence(&haystack, &lines(&["x"]), 0, true), Some(1));
    }

    #[test]
    fn oversized_pattern_returns_none() {
        let haystack = lines(&["only"]);
        assert_eq!(
            seek_sequence(&haystack, &lines(&["too", "long"]), 0, false),
            None
        );
    }
}
