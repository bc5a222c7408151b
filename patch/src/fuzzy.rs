//! Applies parsed hunks to file content using whitespace-normalized
//! matching with a bounded fuzzy search around each hunk's declared anchor.
//!
//! Matching is attempted with decreasing strictness: an exact
//! normalized-line comparison at the anchor first, then a scored scan over a
//! window of candidate start positions. Normalization affects matching only;
//! applied `Add` lines keep their exact text.

use crate::PatchError;
use crate::parser::LineKind;
use crate::parser::ParsedHunk;

pub const DEFAULT_FUZZY_WINDOW: usize = 5;
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.70;

/// Lines of surrounding file content included in a mismatch report.
const ERROR_CONTEXT_LINES: usize = 5;
/// Long lines in mismatch reports are cut to this many characters.
const ERROR_LINE_TRUNCATE: usize = 100;

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_ws = false;
    for ch in line.trim().chars() {
        if ch.is_whitespace() {
            in_ws = true;
        } else {
            if in_ws && !out.is_empty() {
                out.push(' ');
            }
            in_ws = false;
            out.push(ch);
        }
    }
    out
}

/// Cheap asymmetric character-overlap similarity between two normalized
/// strings: the fraction of the shorter string's characters that occur
/// anywhere in the longer one, over the longer length. Identical inputs
/// score 1.0; disjoint inputs score 0.0; two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let max_len = len_a.max(len_b);
    if max_len == 0 {
        return 1.0;
    }
    let (shorter, longer) = if len_a <= len_b { (a, b) } else { (b, a) };
    let matches = shorter.chars().filter(|&ch| longer.contains(ch)).count();
    matches as f64 / max_len as f64
}

pub struct FuzzyPatcher {
    window: usize,
}

impl Default for FuzzyPatcher {
    fn default() -> Self {
        Self {
            window: DEFAULT_FUZZY_WINDOW,
        }
    }
}

impl FuzzyPatcher {
    /// `window` is the number of lines searched on each side of a hunk's
    /// declared anchor. Callers validate the configured range.
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    /// Apply `hunks` in order to `content`, returning the new content.
    /// Hunks after the first are anchored with the cumulative line offset of
    /// the already-applied hunks so that in-file drift stays within the
    /// search window.
    pub fn apply(&self, content: &str, hunks: &[ParsedHunk]) -> Result<String, PatchError> {
        let had_trailing_newline = content.ends_with('\n') || content.is_empty();
        let mut lines: Vec<String> = if content.is_empty() {
            Vec::new()
        } else {
            let mut v: Vec<String> = content.split('\n').map(str::to_string).collect();
            if content.ends_with('\n') {
                v.pop();
            }
            v
        };

        let mut offset: isize = 0;
        for hunk in hunks {
            let matched = self.locate(&lines, hunk, offset)?;
            let delta = apply_at(&mut lines, hunk, matched);
            offset += delta;
        }

        let mut out = lines.join("\n");
        if had_trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        Ok(out)
    }

    /// Find the start index where the hunk's expected-old lines match.
    fn locate(
        &self,
        lines: &[String],
        hunk: &ParsedHunk,
        offset: isize,
    ) -> Result<usize, PatchError> {
        let expected: Vec<String> = hunk
            .lines
            .iter()
            .filter(|l| matches!(l.kind, LineKind::Context | LineKind::Remove))
            .map(|l| normalize_line(&l.content))
            .collect();

        // Insertion-only hunk: nothing to match. A zero-length old range
        // addresses the line *after* which to insert, so the splice index is
        // `old_start` itself (clamped to the end of the file).
        if expected.is_empty() {
            let insert = (hunk.old_start as isize + offset).max(0) as usize;
            return Ok(insert.min(lines.len()));
        }

        let anchor = (hunk.old_start as isize - 1 + offset).max(0) as usize;

        if expected.len() > lines.len() {
            return Err(self.mismatch(lines, hunk, &expected, anchor, 0.0));
        }

        // Exact match at the declared position first.
        let last_valid_start = lines.len() - expected.len();
        if anchor <= last_valid_start
            && expected
                .iter()
                .zip(&lines[anchor..anchor + expected.len()])
                .all(|(want, have)| *want == normalize_line(have))
        {
            return Ok(anchor);
        }

        // Fuzzy search over the window, clipped to valid start positions.
        let lo = anchor.saturating_sub(self.window).min(last_valid_start);
        let hi = (anchor + self.window).min(last_valid_start);
        let mut best: Option<(usize, f64)> = None;
        for start in lo..=hi {
            let mean = expected
                .iter()
                .enumerate()
                .map(|(i, want)| similarity(want, &normalize_line(&lines[start + i])))
                .sum::<f64>()
                / expected.len() as f64;
            // Strict greater-than keeps the first candidate on ties.
            if best.is_none_or(|(_, score)| mean > score) {
                best = Some((start, mean));
            }
        }

        match best {
            Some((start, score)) if score >= FUZZY_MATCH_THRESHOLD => Ok(start),
            Some((_, score)) => Err(self.mismatch(lines, hunk, &expected, anchor, score)),
            None => Err(self.mismatch(lines, hunk, &expected, anchor, 0.0)),
        }
    }

    fn mismatch(
        &self,
        lines: &[String],
        hunk: &ParsedHunk,
        expected: &[String],
        anchor: usize,
        best_score: f64,
    ) -> PatchError {
        let lo = anchor.saturating_sub(ERROR_CONTEXT_LINES).min(lines.len());
        let hi = (anchor + ERROR_CONTEXT_LINES + 1).clamp(lo, lines.len());
        let actual = lines[lo..hi]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}: {}", lo + i + 1, truncate(line)))
            .collect::<Vec<_>>()
            .join("\n");
        PatchError::HunkMismatch {
            line: hunk.old_start,
            expected: expected
                .iter()
                .map(|l| truncate(l))
                .collect::<Vec<_>>()
                .join("\n"),
            actual,
            best_score_pct: (best_score * 100.0).round() as u32,
            window: self.window,
        }
    }
}

/// Splice the hunk into `lines` at `matched`, returning the net line delta.
fn apply_at(lines: &mut Vec<String>, hunk: &ParsedHunk, matched: usize) -> isize {
    let mut cursor = matched;
    let mut delta: isize = 0;
    for line in &hunk.lines {
        match line.kind {
            LineKind::Context => {
                cursor += 1;
            }
            LineKind::Remove => {
                if cursor < lines.len() {
                    lines.remove(cursor);
                    delta -= 1;
                }
            }
            LineKind::Add => {
                lines.insert(cursor.min(lines.len()), line.content.clone());
                cursor += 1;
                delta += 1;
            }
        }
    }
    delta
}

fn truncate(line: &str) -> String {
    if line.chars().count() <= ERROR_LINE_TRUNCATE {
        line.to_string()
    } else {
        let cut: String = line.chars().take(ERROR_LINE_TRUNCATE).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_unified_diff;
    use pretty_assertions::assert_eq;

    fn apply(content: &str, diff: &str) -> Result<String, PatchError> {
        let files = parse_unified_diff(diff).expect("diff parses");
        FuzzyPatcher::default().apply(content, &files[0].hunks)
    }

    #[test]
    fn exact_match_round_trip() {
        let before = "fn main() {\n    old();\n}\n";
        let diff = "\
--- a/f.rs
+++ b/f.rs
@@ -1,3 +1,3 @@
 fn main() {
-    old();
+    new();
 }
";
        assert_eq!(apply(before, diff).expect("applies"), "fn main() {\n    new();\n}\n");
    }

    #[test]
    fn whitespace_differences_still_match_exactly() {
        // Hunk context is normalized; indentation in the file differs.
        let before = "a\n  b\n c\n";
        let diff = "\
--- a/x.ts
+++ b/x.ts
@@ -1,3 +1,3 @@
 a
-b
+B
 c
";
        assert_eq!(apply(before, diff).expect("applies"), "a\nB\n c\n");
    }

    #[test]
    fn fuzzy_search_tolerates_inserted_blank_lines() {
        // Content shifted down by blank lines within the search window.
        let before = "\n\n\nalpha\nbeta\ngamma\n";
        let diff = "\
--- a/f
+++ b/f
@@ -1,3 +1,3 @@
 alpha
-beta
+BETA
 gamma
";
        assert_eq!(
            apply(before, diff).expect("applies"),
            "\n\n\nalpha\nBETA\ngamma\n"
        );
    }

    #[test]
    fn window_is_clipped_at_file_boundaries() {
        // Anchor near the start; the search must not index before line 0.
        let before = "alpha\nbeta\n";
        let diff = "\
--- a/f
+++ b/f
@@ -3,2 +3,2 @@
 alpha
-beta
+BETA
";
        assert_eq!(apply(before, diff).expect("applies"), "alpha\nBETA\n");
    }

    #[test]
    fn mismatch_reports_score_and_context() {
        let before = "one\ntwo\nthree\n";
        let diff = "\
--- a/f
+++ b/f
@@ -1,2 +1,2 @@
 completely
-unrelated
+text
";
        let err = apply(before, diff).expect_err("must fail");
        match err {
            PatchError::HunkMismatch {
                line,
                best_score_pct,
                window,
                ref actual,
                ..
            } => {
                assert_eq!(line, 1);
                assert!(best_score_pct < 70);
                assert_eq!(window, DEFAULT_FUZZY_WINDOW);
                assert!(actual.contains("1: one"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn insertion_only_hunk_appends_at_anchor() {
        let before = "a\nb\n";
        let diff = "\
--- a/f
+++ b/f
@@ -2,0 +3,1 @@
+c
";
        assert_eq!(apply(before, diff).expect("applies"), "a\nb\nc\n");
    }

    #[test]
    fn second_hunk_anchor_tracks_earlier_delta() {
        let before = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl\nm\nn\no\np\nq\nr\ns\nt\n";
        let diff = "\
--- a/f
+++ b/f
@@ -1,2 +1,4 @@
 a
+a1
+a2
 b
@@ -18,2 +20,2 @@
 r
-s
+S
";
        let after = apply(before, diff).expect("applies");
        assert!(after.contains("a\na1\na2\nb\n"));
        assert!(after.contains("r\nS\nt\n"));
    }

    #[test]
    fn similarity_is_one_for_identical_and_zero_for_disjoint() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn similarity_is_asymmetric_overlap_over_longer_length() {
        // Both characters of "ab" occur in "ab--", so 2 matches / 4 chars.
        assert_eq!(similarity("ab", "ab--"), 0.5);
    }

    #[test]
    fn normalize_collapses_interior_runs() {
        assert_eq!(normalize_line("  foo \t  bar  "), "foo bar");
        assert_eq!(normalize_line("\t"), "");
    }
}
