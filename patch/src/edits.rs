//! Semantic edit operations: line-addressed inserts, replacements and
//! deletions plus text search-and-replace. A batch is applied in descending
//! order of each operation's primary line so earlier splices cannot shift
//! the coordinates of later ones.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::PatchError;

/// Inserted declarations are checked for duplicates within this many lines
/// on either side of the insertion point.
const DUPLICATE_SCAN_RADIUS: usize = 10;

/// A single edit. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EditOperation {
    /// Replace occurrences of `old_text`. With `all` unset, exactly the
    /// first occurrence is replaced and a missing needle is an error; with
    /// `all` set, every non-overlapping occurrence is replaced (zero is
    /// fine).
    Replace {
        old_text: String,
        new_text: String,
        #[serde(default)]
        all: bool,
    },
    InsertBefore {
        line: usize,
        content: String,
    },
    InsertAfter {
        line: usize,
        content: String,
    },
    ReplaceLine {
        line: usize,
        content: String,
    },
    ReplaceRange {
        start_line: usize,
        end_line: usize,
        content: String,
    },
    DeleteLine {
        line: usize,
    },
    DeleteRange {
        start_line: usize,
        end_line: usize,
    },
}

impl EditOperation {
    /// Sort key for batch application. Text replaces carry no line anchor
    /// and run after every positional edit.
    fn primary_line(&self) -> usize {
        match self {
            EditOperation::Replace { .. } => 0,
            EditOperation::InsertBefore { line, .. }
            | EditOperation::InsertAfter { line, .. }
            | EditOperation::ReplaceLine { line, .. }
            | EditOperation::DeleteLine { line } => *line,
            EditOperation::ReplaceRange { start_line, .. }
            | EditOperation::DeleteRange { start_line, .. } => *start_line,
        }
    }
}

/// Apply a batch of edits to `content`. The batch is sorted descending by
/// primary line before application; each operation is validated against the
/// content as it stands when that operation runs.
pub fn apply_edits(content: &str, edits: &[EditOperation]) -> Result<String, PatchError> {
    let had_trailing_newline = content.ends_with('\n') || content.is_empty();
    let mut lines = split_lines(content);

    let mut ordered: Vec<&EditOperation> = edits.iter().collect();
    ordered.sort_by_key(|op| std::cmp::Reverse(op.primary_line()));

    for op in ordered {
        apply_one(&mut lines, op)?;
    }

    let mut out = lines.join("\n");
    if had_trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

fn apply_one(lines: &mut Vec<String>, op: &EditOperation) -> Result<(), PatchError> {
    let n = lines.len();
    match op {
        EditOperation::Replace {
            old_text,
            new_text,
            all,
        } => {
            let joined = lines.join("\n");
            let replaced = if *all {
                joined.replace(old_text.as_str(), new_text)
            } else if let Some(at) = joined.find(old_text.as_str()) {
                let mut s = String::with_capacity(joined.len());
                s.push_str(&joined[..at]);
                s.push_str(new_text);
                s.push_str(&joined[at + old_text.len()..]);
                s
            } else {
                return Err(PatchError::ReplaceNotFound {
                    snippet: snippet(old_text),
                });
            };
            *lines = split_lines(&replaced);
        }
        EditOperation::InsertBefore { line, content } => {
            check_line(*line, n + 1)?;
            splice(lines, line - 1, 0, content);
        }
        EditOperation::InsertAfter { line, content } => {
            check_line(*line, n)?;
            splice(lines, *line, 0, content);
        }
        EditOperation::ReplaceLine { line, content } => {
            check_line(*line, n)?;
            splice(lines, line - 1, 1, content);
        }
        EditOperation::ReplaceRange {
            start_line,
            end_line,
            content,
        } => {
            check_range(*start_line, *end_line, n)?;
            splice(lines, start_line - 1, end_line - start_line + 1, content);
        }
        EditOperation::DeleteLine { line } => {
            check_line(*line, n)?;
            lines.remove(line - 1);
        }
        EditOperation::DeleteRange {
            start_line,
            end_line,
        } => {
            check_range(*start_line, *end_line, n)?;
            lines.drain(start_line - 1..*end_line);
        }
    }
    Ok(())
}

/// Reject inserts whose content opens with a declaration whose identifier
/// already occurs near the insertion point. This catches the common failure
/// mode where a generator re-inserts a function it just wrote instead of
/// editing it in place.
pub fn validate_insert_declarations(
    content: &str,
    edits: &[EditOperation],
) -> Result<(), PatchError> {
    let lines = split_lines(content);
    for op in edits {
        let (line, inserted) = match op {
            EditOperation::InsertBefore { line, content }
            | EditOperation::InsertAfter { line, content } => (*line, content),
            _ => continue,
        };
        let Some(name) = leading_declaration_name(inserted) else {
            continue;
        };
        // An out-of-range line is the executor's error to report; just
        // clamp the scan here.
        let lo = line.saturating_sub(DUPLICATE_SCAN_RADIUS + 1).min(lines.len());
        let hi = (line + DUPLICATE_SCAN_RADIUS).clamp(lo, lines.len());
        let ident_re = identifier_pattern(&name);
        if lines[lo..hi].iter().any(|l| ident_re.is_match(l)) {
            return Err(PatchError::DuplicateDeclaration {
                name,
                line,
                within: DUPLICATE_SCAN_RADIUS,
            });
        }
    }
    Ok(())
}

#[expect(clippy::expect_used)]
static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:async\s+)?(?:function|class|const|let|var|type|interface|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("declaration pattern compiles")
});

fn leading_declaration_name(content: &str) -> Option<String> {
    let first = content.lines().next()?;
    DECLARATION_RE
        .captures(first)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[expect(clippy::expect_used)]
fn identifier_pattern(name: &str) -> Regex {
    // `$` is the only legal identifier character with regex meaning.
    let escaped = name.replace('$', r"\$");
    Regex::new(&format!(r"\b{escaped}\b")).expect("identifier pattern compiles")
}

fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut v: Vec<String> = content.split('\n').map(str::to_string).collect();
    if content.ends_with('\n') {
        v.pop();
    }
    v
}

fn splice(lines: &mut Vec<String>, at: usize, remove: usize, content: &str) {
    lines.splice(at..at + remove, content.lines().map(str::to_string));
}

fn check_line(line: usize, max: usize) -> Result<(), PatchError> {
    if line >= 1 && line <= max {
        Ok(())
    } else {
        Err(PatchError::InvalidLine { line, max })
    }
}

fn check_range(start: usize, end: usize, max: usize) -> Result<(), PatchError> {
    if start >= 1 && start <= end && end <= max {
        Ok(())
    } else {
        Err(PatchError::InvalidRange { start, end, max })
    }
}

fn snippet(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FILE: &str = "one\ntwo\nthree\nfour\n";

    #[test]
    fn insert_before_and_after() {
        let out = apply_edits(
            FILE,
            &[EditOperation::InsertBefore {
                line: 1,
                content: "zero".into(),
            }],
        )
        .expect("applies");
        assert_eq!(out, "zero\none\ntwo\nthree\nfour\n");

        let out = apply_edits(
            FILE,
            &[EditOperation::InsertAfter {
                line: 4,
                content: "five".into(),
            }],
        )
        .expect("applies");
        assert_eq!(out, "one\ntwo\nthree\nfour\nfive\n");
    }

    #[test]
    fn insert_before_accepts_line_n_plus_one() {
        let out = apply_edits(
            FILE,
            &[EditOperation::InsertBefore {
                line: 5,
                content: "five".into(),
            }],
        )
        .expect("applies");
        assert_eq!(out, "one\ntwo\nthree\nfour\nfive\n");
    }

    #[test]
    fn replace_and_delete_ranges() {
        let out = apply_edits(
            FILE,
            &[EditOperation::ReplaceRange {
                start_line: 2,
                end_line: 3,
                content: "TWO\nTHREE".into(),
            }],
        )
        .expect("applies");
        assert_eq!(out, "one\nTWO\nTHREE\nfour\n");

        let out = apply_edits(
            FILE,
            &[EditOperation::DeleteRange {
                start_line: 1,
                end_line: 3,
            }],
        )
        .expect("applies");
        assert_eq!(out, "four\n");
    }

    #[test]
    fn batch_order_does_not_matter() {
        // The executor sorts descending by line, so both permutations land
        // on identical content.
        let forward = [
            EditOperation::DeleteLine { line: 1 },
            EditOperation::ReplaceLine {
                line: 3,
                content: "THREE".into(),
            },
        ];
        let mut reversed = forward.to_vec();
        reversed.reverse();
        assert_eq!(
            apply_edits(FILE, &forward).expect("applies"),
            apply_edits(FILE, &reversed).expect("applies"),
        );
    }

    #[test]
    fn replace_first_occurrence_only_unless_all() {
        let src = "x = 1\ny = 1\n";
        let out = apply_edits(
            src,
            &[EditOperation::Replace {
                old_text: "1".into(),
                new_text: "2".into(),
                all: false,
            }],
        )
        .expect("applies");
        assert_eq!(out, "x = 2\ny = 1\n");

        let out = apply_edits(
            src,
            &[EditOperation::Replace {
                old_text: "1".into(),
                new_text: "2".into(),
                all: true,
            }],
        )
        .expect("applies");
        assert_eq!(out, "x = 2\ny = 2\n");
    }

    #[test]
    fn missing_needle_is_an_error_without_all() {
        let err = apply_edits(
            FILE,
            &[EditOperation::Replace {
                old_text: "absent".into(),
                new_text: "x".into(),
                all: false,
            }],
        )
        .expect_err("must fail");
        assert!(matches!(err, PatchError::ReplaceNotFound { .. }));

        // With `all`, zero occurrences is a no-op.
        let out = apply_edits(
            FILE,
            &[EditOperation::Replace {
                old_text: "absent".into(),
                new_text: "x".into(),
                all: true,
            }],
        )
        .expect("applies");
        assert_eq!(out, FILE);
    }

    #[test]
    fn out_of_range_lines_are_rejected() {
        let err = apply_edits(FILE, &[EditOperation::DeleteLine { line: 5 }])
            .expect_err("must fail");
        assert_eq!(err, PatchError::InvalidLine { line: 5, max: 4 });

        let err = apply_edits(
            FILE,
            &[EditOperation::DeleteRange {
                start_line: 3,
                end_line: 2,
            }],
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            PatchError::InvalidRange {
                start: 3,
                end: 2,
                max: 4
            }
        );
    }

    #[test]
    fn duplicate_declaration_nearby_is_rejected() {
        let src = "function setup() {}\nlet x = 1;\n";
        let err = validate_insert_declarations(
            src,
            &[EditOperation::InsertAfter {
                line: 2,
                content: "function setup() { return 2; }".into(),
            }],
        )
        .expect_err("must fail");
        match err {
            PatchError::DuplicateDeclaration { name, .. } => assert_eq!(name, "setup"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn distant_declaration_is_allowed() {
        let mut src = String::from("function setup() {}\n");
        for i in 0..30 {
            src.push_str(&format!("let v{i} = {i};\n"));
        }
        validate_insert_declarations(
            &src,
            &[EditOperation::InsertAfter {
                line: 31,
                content: "function setup() { return 2; }".into(),
            }],
        )
        .expect("far enough away");
    }

    #[test]
    fn non_declaration_insert_is_not_checked() {
        validate_insert_declarations(
            "function setup() {}\n",
            &[EditOperation::InsertAfter {
                line: 1,
                content: "setup();".into(),
            }],
        )
        .expect("plain statements pass");
    }

    #[test]
    fn wire_format_round_trips() {
        let op: EditOperation = serde_json::from_str(
            r#"{"op":"insertBefore","line":3,"content":"x"}"#,
        )
        .expect("deserializes");
        assert_eq!(
            op,
            EditOperation::InsertBefore {
                line: 3,
                content: "x".into()
            }
        );

        let op: EditOperation = serde_json::from_str(
            r#"{"op":"replace","oldText":"a","newText":"b"}"#,
        )
        .expect("deserializes");
        assert_eq!(
            op,
            EditOperation::Replace {
                old_text: "a".into(),
                new_text: "b".into(),
                all: false
            }
        );
    }
}
