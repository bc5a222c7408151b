//! Maps error output back to the iteration most likely to have caused it.
//! File references are pulled from three shapes of error text, then matched
//! against the per-step modification records, newest first. A second
//! detector watches the last few evaluations for cascading failures.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::session::EvalResult;
use crate::session::IterationContext;

#[expect(clippy::expect_used)]
static PATH_LINE_COL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<path>[A-Za-z0-9_@./\\-]+\.[A-Za-z0-9]+):(?P<line>\d+)(?::(?P<col>\d+))?")
        .expect("path:line:col pattern compiles")
});

#[expect(clippy::expect_used)]
static STACK_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"at [^\n(]*\((?P<path>[^():]+):(?P<line>\d+):(?P<col>\d+)\)")
        .expect("stack frame pattern compiles")
});

#[expect(clippy::expect_used)]
static ERROR_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Error in (?P<path>[^\s:,]+)").expect("error-in pattern compiles")
});

// tsc writes `path(line,col)` instead of `path:line:col`.
#[expect(clippy::expect_used)]
static PAREN_LINE_COL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<path>[A-Za-z0-9_@./\\-]+\.[A-Za-z0-9]+)\(\d+,\d+\)")
        .expect("path(line,col) pattern compiles")
});

/// Paths referenced anywhere in `output`, deduplicated, in no particular
/// order.
pub fn referenced_paths(output: &str) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for caps in PATH_LINE_COL_RE.captures_iter(output) {
        paths.insert(caps["path"].to_string());
    }
    for caps in PAREN_LINE_COL_RE.captures_iter(output) {
        paths.insert(caps["path"].to_string());
    }
    for caps in STACK_FRAME_RE.captures_iter(output) {
        paths.insert(caps["path"].to_string());
    }
    for caps in ERROR_IN_RE.captures_iter(output) {
        paths.insert(caps["path"].to_string());
    }
    paths
}

#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    /// Analysis lines suitable for direct inclusion in feedback.
    pub lines: Vec<String>,
    /// Step of the iteration whose files intersect the error references.
    pub culprit_step: Option<u32>,
}

/// Walk iterations newest-first and pick the first whose modified files
/// intersect the error's referenced paths (substring containment in either
/// direction, so `src/a.ts` matches a diagnostic that says `a.ts`). The
/// newest successful iteration before the culprit becomes the rollback
/// pointer.
pub fn correlate(error_output: &str, iterations: &[IterationContext]) -> Correlation {
    let referenced = referenced_paths(error_output);
    if referenced.is_empty() {
        return Correlation {
            lines: Vec::new(),
            culprit_step: None,
        };
    }

    let culprit = iterations.iter().rev().find(|ctx| {
        ctx.files_modified.iter().any(|modified| {
            referenced
                .iter()
                .any(|r| modified.contains(r.as_str()) || r.contains(modified.as_str()))
        })
    });

    let mut lines = Vec::new();
    let mut culprit_step = None;
    match culprit {
        Some(ctx) => {
            culprit_step = Some(ctx.step);
            lines.push(format!(
                "errors reference {}; likely culprit: step {} ({} mode touching {})",
                join_paths(&referenced),
                ctx.step,
                ctx.mode,
                ctx.files_modified.join(", "),
            ));
            if let Some(last_good) = iterations
                .iter()
                .rev()
                .find(|prior| prior.step < ctx.step && prior.success)
            {
                lines.push(format!(
                    "last successful iteration was step {}; consider undoing back to it",
                    last_good.step
                ));
            }
        }
        None => {
            lines.push(format!(
                "errors reference {} but no recorded iteration modified those files",
                join_paths(&referenced)
            ));
        }
    }

    Correlation {
        lines,
        culprit_step,
    }
}

fn join_paths(paths: &BTreeSet<String>) -> String {
    paths.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Inspect the last three evaluations for failure patterns that a
/// per-step view misses.
pub fn detect_cascading(history: &[EvalResult]) -> Vec<String> {
    let mut flags = Vec::new();
    if history.len() < 3 {
        return flags;
    }
    let [a, b, c] = match &history[history.len() - 3..] {
        [a, b, c] => [a, b, c],
        _ => return flags,
    };

    if a.build_ok && !b.build_ok && !c.build_ok {
        flags.push(
            "build broke two steps ago and is still failing; later test failures are likely \
             cascading from it"
                .to_string(),
        );
    }

    let rates: Vec<Option<f64>> = [a, b, c]
        .iter()
        .map(|entry| entry.tests.map(|t| t.pass_rate()))
        .collect();
    if let [Some(r1), Some(r2), Some(r3)] = rates[..]
        && r1 > 0.8
        && r2 < 0.5
        && r3 <= r2
    {
        flags.push(
            "test pass rate is dropping sharply across recent steps; this looks like a \
             fundamental issue rather than an isolated failure"
                .to_string(),
        );
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::TestCounts;
    use pretty_assertions::assert_eq;

    fn iteration(step: u32, files: &[&str], success: bool) -> IterationContext {
        IterationContext {
            step,
            files_modified: files.iter().map(|s| s.to_string()).collect(),
            mode: "modify".to_string(),
            success,
        }
    }

    #[test]
    fn extracts_all_reference_shapes() {
        let output = "src/app.ts:14:9: error\n    at handler (lib/util.js:3:1)\nError in build/config.json\nsrc/other.ts(4,2): error TS1005: ';' expected.";
        let paths = referenced_paths(output);
        assert!(paths.contains("src/app.ts"));
        assert!(paths.contains("lib/util.js"));
        assert!(paths.contains("build/config.json"));
        assert!(paths.contains("src/other.ts"));
    }

    #[test]
    fn newest_touching_iteration_is_the_culprit() {
        let iterations = vec![
            iteration(1, &["src/app.ts"], true),
            iteration(2, &["src/other.ts"], true),
            iteration(3, &["src/app.ts"], false),
        ];
        let result = correlate("src/app.ts:1:1: error: boom", &iterations);
        assert_eq!(result.culprit_step, Some(3));
        assert!(result.lines[0].contains("step 3"));
        // Step 2 is the newest successful iteration before the culprit.
        assert!(result.lines[1].contains("step 2"));
    }

    #[test]
    fn substring_containment_matches_both_directions() {
        let iterations = vec![iteration(1, &["src/deep/nested/mod.rs"], false)];
        let result = correlate("nested/mod.rs:5:1: error: x", &iterations);
        assert_eq!(result.culprit_step, Some(1));
    }

    #[test]
    fn no_references_mean_no_analysis() {
        let result = correlate("something vague happened", &[]);
        assert!(result.lines.is_empty());
        assert_eq!(result.culprit_step, None);
    }

    fn entry(step: u32, build_ok: bool, tests: Option<(u32, u32)>) -> EvalResult {
        EvalResult {
            step,
            build_ok,
            lint_ok: true,
            tests: tests.map(|(passed, total)| TestCounts {
                passed,
                failed: total - passed,
                total,
            }),
            perf: None,
            score: 0.5,
            ema_score: 0.5,
            feedback: Vec::new(),
            should_halt: false,
            reasons: Vec::new(),
            mode_suggestion: None,
        }
    }

    #[test]
    fn build_flip_to_persistent_failure_is_flagged() {
        let history = vec![
            entry(1, true, None),
            entry(2, false, None),
            entry(3, false, None),
        ];
        let flags = detect_cascading(&history);
        assert_eq!(flags.len(), 1);
        assert!(flags[0].contains("cascading"));
    }

    #[test]
    fn monotonic_test_collapse_is_flagged() {
        let history = vec![
            entry(1, true, Some((9, 10))),
            entry(2, true, Some((4, 10))),
            entry(3, true, Some((2, 10))),
        ];
        let flags = detect_cascading(&history);
        assert_eq!(flags.len(), 1);
        assert!(flags[0].contains("pass rate"));
    }

    #[test]
    fn short_history_produces_no_flags() {
        let history = vec![entry(1, false, None), entry(2, false, None)];
        assert!(detect_cascading(&history).is_empty());
    }
}
