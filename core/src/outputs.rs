//! Heuristic parsers over evaluation command output: test summaries,
//! compiler diagnostics, benchmark readings, and generic hint lines.
//! A parse failure is "no structured data", never an error; scoring treats
//! missing data according to its own rules.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

impl TestCounts {
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(self.total)
        }
    }
}

#[expect(clippy::expect_used)]
static JEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Tests:\s+(?:(?P<failed>\d+) failed,\s+)?(?:\d+ skipped,\s+)?(?P<passed>\d+) passed,\s+(?P<total>\d+) total",
    )
    .expect("jest summary pattern compiles")
});

#[expect(clippy::expect_used)]
static CARGO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (?P<passed>\d+) passed; (?P<failed>\d+) failed")
        .expect("cargo summary pattern compiles")
});

#[expect(clippy::expect_used)]
static PYTEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=+ (?:(?P<failed>\d+) failed, )?(?P<passed>\d+) passed.* =+")
        .expect("pytest summary pattern compiles")
});

#[expect(clippy::expect_used)]
static MOCHA_PASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<passing>\d+) passing").expect("mocha pattern compiles"));

#[expect(clippy::expect_used)]
static MOCHA_FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<failing>\d+) failing").expect("mocha pattern compiles"));

/// Extract pass/fail/total counts from a test runner's output. Recognizes
/// jest/vitest, cargo test, pytest, and mocha summary lines, in that order.
/// `cargo test` may emit several per-target summaries; those are summed.
pub fn parse_test_output(stdout: &str, stderr: &str) -> Option<TestCounts> {
    let combined = format!("{stdout}\n{stderr}");

    if let Some(caps) = JEST_RE.captures(&combined) {
        let failed = capture_u32(&caps, "failed");
        let passed = capture_u32(&caps, "passed");
        let total = capture_u32(&caps, "total").max(passed + failed);
        return Some(TestCounts {
            passed,
            failed,
            total,
        });
    }

    let mut cargo_totals: Option<TestCounts> = None;
    for caps in CARGO_RE.captures_iter(&combined) {
        let passed = capture_u32(&caps, "passed");
        let failed = capture_u32(&caps, "failed");
        let entry = cargo_totals.get_or_insert(TestCounts {
            passed: 0,
            failed: 0,
            total: 0,
        });
        entry.passed += passed;
        entry.failed += failed;
        entry.total += passed + failed;
    }
    if let Some(counts) = cargo_totals {
        return Some(counts);
    }

    if let Some(caps) = PYTEST_RE.captures(&combined) {
        let failed = capture_u32(&caps, "failed");
        let passed = capture_u32(&caps, "passed");
        return Some(TestCounts {
            passed,
            failed,
            total: passed + failed,
        });
    }

    if let Some(caps) = MOCHA_PASS_RE.captures(&combined) {
        let passed = capture_u32(&caps, "passing");
        let failed = MOCHA_FAIL_RE
            .captures(&combined)
            .map(|c| capture_u32(&c, "failing"))
            .unwrap_or(0);
        return Some(TestCounts {
            passed,
            failed,
            total: passed + failed,
        });
    }

    None
}

fn capture_u32(caps: &regex_lite::Captures<'_>, name: &str) -> u32 {
    caps.name(name)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// One structured compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub code: Option<String>,
    pub message: String,
}

#[expect(clippy::expect_used)]
static TSC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<file>[^\s(]+)\((?P<line>\d+),(?P<col>\d+)\): error (?P<code>TS\d+): (?P<message>.+)",
    )
    .expect("tsc diagnostic pattern compiles")
});

#[expect(clippy::expect_used)]
static GCC_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+):\s*error(?:\[(?P<code>[A-Z]\d+)\])?:?\s*(?P<message>.+)")
        .expect("gcc diagnostic pattern compiles")
});

#[expect(clippy::expect_used)]
static RUSTC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"error\[(?P<code>E\d+)\]: (?P<message>.+)\n\s*--> (?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+)")
        .expect("rustc diagnostic pattern compiles")
});

/// Extract structured diagnostics from compiler output. Supports the tsc
/// `file(line,col): error TSxxxx:` form, the gcc/clang `file:line:col:
/// error:` form, and rustc's two-line `error[Exxxx]: … --> file:line:col`.
pub fn parse_build_diagnostics(output: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for caps in TSC_RE.captures_iter(output) {
        diagnostics.push(Diagnostic {
            file: caps["file"].to_string(),
            line: capture_u32(&caps, "line"),
            column: capture_u32(&caps, "col"),
            code: Some(caps["code"].to_string()),
            message: caps["message"].trim().to_string(),
        });
    }

    for caps in RUSTC_RE.captures_iter(output) {
        diagnostics.push(Diagnostic {
            file: caps["file"].to_string(),
            line: capture_u32(&caps, "line"),
            column: capture_u32(&caps, "col"),
            code: Some(caps["code"].to_string()),
            message: caps["message"].trim().to_string(),
        });
    }

    for caps in GCC_STYLE_RE.captures_iter(output) {
        let diag = Diagnostic {
            file: caps["file"].to_string(),
            line: capture_u32(&caps, "line"),
            column: capture_u32(&caps, "col"),
            code: caps.name("code").map(|m| m.as_str().to_string()),
            message: caps["message"].trim().to_string(),
        };
        // The tsc and rustc passes can shadow this generic form.
        if !diagnostics
            .iter()
            .any(|d| d.file == diag.file && d.line == diag.line && d.column == diag.column)
        {
            diagnostics.push(diag);
        }
    }

    diagnostics
}

/// A terse followup hint for a diagnostic code, where one is known.
pub fn diagnostic_suggestion(code: Option<&str>) -> Option<&'static str> {
    match code? {
        "TS2304" => Some("the name is not in scope; add the missing import or declaration"),
        "TS2322" | "TS2345" => Some("the types disagree; align the value with the expected type"),
        "TS2339" => Some("the property does not exist on this type; check the receiver's type"),
        "TS1005" => Some("syntax error; a token is missing near the reported position"),
        "E0308" => Some("mismatched types; check the expected and found types at this position"),
        "E0425" => Some("unresolved name; add the missing binding or import"),
        _ => None,
    }
}

#[expect(clippy::expect_used)]
static PERF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:time|bench(?:mark)?|perf|latency|duration)\s*[:=]?\s*(?P<value>\d+(?:\.\d+)?)")
        .expect("perf pattern compiles")
});

/// Pull a scalar performance reading out of benchmark output. Lower is
/// better by convention; the scorer normalizes against the best seen.
pub fn parse_perf_value(stdout: &str, stderr: &str) -> Option<f64> {
    let combined = format!("{stdout}\n{stderr}");
    PERF_RE
        .captures(&combined)
        .and_then(|caps| caps["value"].parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    Error,
    Warning,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintLine {
    pub kind: HintKind,
    pub text: String,
}

const HINT_LINE_TRUNCATE: usize = 200;

/// Pick out lines from command output that look actionable. Order is
/// preserved; at most `max` lines are returned.
pub fn extract_hint_lines(output: &str, max: usize) -> Vec<HintLine> {
    let mut hints = Vec::new();
    for raw in output.lines() {
        if hints.len() >= max {
            break;
        }
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lowered = line.to_lowercase();
        let kind = if lowered.contains("error") {
            HintKind::Error
        } else if lowered.contains("warning") {
            HintKind::Warning
        } else if lowered.contains("fail") {
            HintKind::Failure
        } else {
            continue;
        };
        let text = if line.chars().count() > HINT_LINE_TRUNCATE {
            let cut: String = line.chars().take(HINT_LINE_TRUNCATE).collect();
            format!("{cut}…")
        } else {
            line.to_string()
        };
        hints.push(HintLine { kind, text });
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_jest_summary() {
        let out = "Test Suites: 2 passed, 2 total\nTests:       1 failed, 7 passed, 8 total\n";
        assert_eq!(
            parse_test_output(out, ""),
            Some(TestCounts {
                passed: 7,
                failed: 1,
                total: 8
            })
        );
    }

    #[test]
    fn parses_jest_all_passing() {
        let out = "Tests:       5 passed, 5 total\n";
        let counts = parse_test_output(out, "").expect("parses");
        assert!(counts.all_passed());
    }

    #[test]
    fn parses_and_sums_cargo_summaries() {
        let out = "test result: ok. 3 passed; 0 failed; 0 ignored\n\
                   test result: FAILED. 4 passed; 2 failed; 0 ignored\n";
        assert_eq!(
            parse_test_output(out, ""),
            Some(TestCounts {
                passed: 7,
                failed: 2,
                total: 9
            })
        );
    }

    #[test]
    fn parses_pytest_summary() {
        let out = "========= 2 failed, 9 passed in 1.24s =========";
        assert_eq!(
            parse_test_output(out, ""),
            Some(TestCounts {
                passed: 9,
                failed: 2,
                total: 11
            })
        );
    }

    #[test]
    fn parses_mocha_summary() {
        let out = "  12 passing (340ms)\n  3 failing\n";
        assert_eq!(
            parse_test_output(out, ""),
            Some(TestCounts {
                passed: 12,
                failed: 3,
                total: 15
            })
        );
    }

    #[test]
    fn unparseable_output_is_none() {
        assert_eq!(parse_test_output("it went great", ""), None);
    }

    #[test]
    fn parses_tsc_diagnostics() {
        let out = "src/app.ts(14,9): error TS2304: Cannot find name 'foo'.";
        let diags = parse_build_diagnostics(out);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, "src/app.ts");
        assert_eq!((diags[0].line, diags[0].column), (14, 9));
        assert_eq!(diags[0].code.as_deref(), Some("TS2304"));
        assert!(diagnostic_suggestion(diags[0].code.as_deref()).is_some());
    }

    #[test]
    fn parses_gcc_style_diagnostics() {
        let out = "src/main.c:10:5: error: expected ';' before 'return'";
        let diags = parse_build_diagnostics(out);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, "src/main.c");
        assert_eq!(diags[0].code, None);
    }

    #[test]
    fn parses_rustc_diagnostics() {
        let out = "error[E0308]: mismatched types\n  --> src/lib.rs:42:13\n";
        let diags = parse_build_diagnostics(out);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, "src/lib.rs");
        assert_eq!(diags[0].code.as_deref(), Some("E0308"));
    }

    #[test]
    fn parses_perf_reading() {
        assert_eq!(parse_perf_value("time: 123.4 ms", ""), Some(123.4));
        assert_eq!(parse_perf_value("bench 250", ""), Some(250.0));
        assert_eq!(parse_perf_value("all good", ""), None);
    }

    #[test]
    fn hint_lines_are_classified_and_capped() {
        let out = "error: one\nwarning: two\nFAILED three\nplain line\nerror: four\n";
        let hints = extract_hint_lines(out, 2);
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].kind, HintKind::Error);
        assert_eq!(hints[1].kind, HintKind::Warning);
    }
}
