//! Pure text transforms for candidate application: unified-diff parsing,
//! fuzzy hunk application, and semantic edit operations. This crate performs
//! no I/O; callers hand it file contents and get new contents back.

mod edits;
mod fuzzy;
mod parser;

pub use edits::EditOperation;
pub use edits::apply_edits;
pub use edits::validate_insert_declarations;
pub use fuzzy::DEFAULT_FUZZY_WINDOW;
pub use fuzzy::FUZZY_MATCH_THRESHOLD;
pub use fuzzy::FuzzyPatcher;
pub use fuzzy::normalize_line;
pub use fuzzy::similarity;
pub use parser::FileDiff;
pub use parser::HunkLine;
pub use parser::LineKind;
pub use parser::ParsedHunk;
pub use parser::parse_unified_diff;

use thiserror::Error;

/// Errors produced while turning a candidate's text payload into new file
/// content. These abort the submission; the caller must not retain any
/// partially applied state.
#[derive(Debug, Error, PartialEq)]
pub enum PatchError {
    #[error("invalid diff: {0}")]
    InvalidDiff(String),

    #[error(
        "hunk failed to apply at line {line}: best match scored {best_score_pct}% \
         (needed 70%) within a ±{window} line window.\nExpected:\n{expected}\nActual context:\n{actual}"
    )]
    HunkMismatch {
        line: usize,
        expected: String,
        actual: String,
        best_score_pct: u32,
        window: usize,
    },

    #[error("replacement text not found: {snippet:?}")]
    ReplaceNotFound { snippet: String },

    #[error("line {line} is out of range (file has {max} lines)")]
    InvalidLine { line: usize, max: usize },

    #[error("invalid range {start}..{end} (file has {max} lines)")]
    InvalidRange {
        start: usize,
        end: usize,
        max: usize,
    },

    #[error("declaration `{name}` already exists within {within} lines of line {line}")]
    DuplicateDeclaration {
        name: String,
        line: usize,
        within: usize,
    },
}
