//! Parses git-style unified diffs into an ordered list of per-file hunk
//! sequences. Parsing is deliberately lenient about everything except the
//! hunk headers themselves: metadata lines (`index …`, `new file mode …`)
//! are skipped, and a `\ No newline at end of file` marker is ignored.

use crate::PatchError;

const DIFF_GIT_MARKER: &str = "diff --git ";
const OLD_FILE_MARKER: &str = "--- ";
const NEW_FILE_MARKER: &str = "+++ ";
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Classification of a single line inside a hunk body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HunkLine {
    pub kind: LineKind,
    pub content: String,
}

/// One `@@`-delimited hunk. Line numbers are 1-based as declared in the
/// header; omitted counts default to 1 per the unified-diff format.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDiff {
    /// Repository-relative path of the file after the patch (the `b/` side,
    /// with the `b/` prefix stripped).
    pub path: String,
    pub hunks: Vec<ParsedHunk>,
}

/// Parse a unified diff covering one or more files.
///
/// File boundaries are recognized from `diff --git a/… b/…` lines or from a
/// `---`/`+++` header pair. Returns files in the order they appear, each
/// with its hunks in order.
pub fn parse_unified_diff(diff: &str) -> Result<Vec<FileDiff>, PatchError> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;

    for raw in diff.lines() {
        // While the current hunk still expects body lines, +/-/space lines
        // belong to it even when they resemble a `---`/`+++` header.
        if raw != NO_NEWLINE_MARKER
            && let Some(file) = current.as_mut()
            && let Some(hunk) = file.hunks.last_mut()
            && body_remaining(hunk)
            && let Some((kind, content)) = classify_body_line(raw)
        {
            hunk.lines.push(HunkLine {
                kind,
                content: content.to_string(),
            });
            continue;
        }

        if let Some(rest) = raw.strip_prefix(DIFF_GIT_MARKER) {
            if let Some(file) = current.take() {
                files.push(file);
            }
            current = Some(FileDiff {
                path: new_path_from_diff_git(rest),
                hunks: Vec::new(),
            });
            continue;
        }

        if raw.starts_with(OLD_FILE_MARKER) && !raw.starts_with(NEW_FILE_MARKER) {
            // The `---` of a `---`/`+++` pair opens a new file section unless
            // a `diff --git` line already did and no hunks have landed yet.
            match &current {
                Some(file) if file.hunks.is_empty() => {}
                _ => {
                    if let Some(file) = current.take() {
                        files.push(file);
                    }
                    current = Some(FileDiff {
                        path: String::new(),
                        hunks: Vec::new(),
                    });
                }
            }
            continue;
        }

        if let Some(rest) = raw.strip_prefix(NEW_FILE_MARKER) {
            if let Some(file) = current.as_mut()
                && file.hunks.is_empty()
            {
                file.path = strip_b_prefix(rest.trim()).to_string();
            }
            continue;
        }

        if raw.starts_with("@@") {
            let hunk = parse_hunk_header(raw)?;
            match current.as_mut() {
                Some(file) => file.hunks.push(hunk),
                None => {
                    return Err(PatchError::InvalidDiff(
                        "hunk header before any file header".to_string(),
                    ));
                }
            }
            continue;
        }

        // Anything else (index lines, mode lines, commit messages) is
        // skipped.
    }

    if let Some(file) = current.take() {
        files.push(file);
    }

    Ok(files)
}

/// True while the hunk has consumed fewer old or new lines than its header
/// declared. Context lines count on both sides.
fn body_remaining(hunk: &ParsedHunk) -> bool {
    let (mut old, mut new) = (0usize, 0usize);
    for line in &hunk.lines {
        match line.kind {
            LineKind::Context => {
                old += 1;
                new += 1;
            }
            LineKind::Remove => old += 1,
            LineKind::Add => new += 1,
        }
    }
    old < hunk.old_lines || new < hunk.new_lines
}

/// Classify a hunk body line by its first character; an empty line is
/// empty context. Returns `None` for anything that is not a body line.
fn classify_body_line(raw: &str) -> Option<(LineKind, &str)> {
    match raw.chars().next() {
        Some('+') => Some((LineKind::Add, &raw[1..])),
        Some('-') => Some((LineKind::Remove, &raw[1..])),
        Some(' ') => Some((LineKind::Context, &raw[1..])),
        None => Some((LineKind::Context, "")),
        _ => None,
    }
}

/// `diff --git a/foo b/foo` → `foo`. Paths with spaces are resolved by
/// taking the last whitespace-separated token, which matches how git writes
/// these lines for the common case.
fn new_path_from_diff_git(rest: &str) -> String {
    let new_side = rest.split_whitespace().last().unwrap_or_default();
    strip_b_prefix(new_side).to_string()
}

fn strip_b_prefix(path: &str) -> &str {
    path.strip_prefix("b/").unwrap_or(path)
}

/// Parse `@@ -oldStart[,oldLines] +newStart[,newLines] @@`. Any trailing
/// section heading after the second `@@` is ignored.
fn parse_hunk_header(line: &str) -> Result<ParsedHunk, PatchError> {
    let invalid = || PatchError::InvalidDiff(format!("malformed hunk header: {line:?}"));

    let body = line
        .strip_prefix("@@")
        .and_then(|rest| rest.split("@@").next())
        .ok_or_else(invalid)?
        .trim();

    let mut old_range: Option<(usize, usize)> = None;
    let mut new_range: Option<(usize, usize)> = None;
    for token in body.split_whitespace() {
        if let Some(spec) = token.strip_prefix('-') {
            old_range = Some(parse_range(spec).ok_or_else(invalid)?);
        } else if let Some(spec) = token.strip_prefix('+') {
            new_range = Some(parse_range(spec).ok_or_else(invalid)?);
        }
    }

    let (old_start, old_lines) = old_range.ok_or_else(invalid)?;
    let (new_start, new_lines) = new_range.ok_or_else(invalid)?;
    Ok(ParsedHunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        lines: Vec::new(),
    })
}

fn parse_range(spec: &str) -> Option<(usize, usize)> {
    match spec.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((spec.parse().ok()?, 1)),
    }
}
