//! Hard limits and tuning constants shared across the engine. Values are
//! part of the external contract; tests pin the load-bearing ones.

/// Largest file content accepted or produced by a candidate, in bytes.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Most files a single candidate may touch.
pub const MAX_CANDIDATE_FILES: usize = 100;

/// Rationale notes beyond this many characters are truncated.
pub const MAX_RATIONALE_LENGTH: usize = 4000;

/// Most generic hint lines extracted from command output per evaluation.
pub const MAX_HINT_LINES: usize = 12;

/// Feedback list cap after deduplication.
pub const MAX_FEEDBACK_ITEMS: usize = 16;

/// Most paths accepted by a single getFileContent call.
pub const MAX_FILE_READ_PATHS: usize = 50;

/// A `files` submission larger than this in total draws a warning.
pub const LARGE_SUBMISSION_WARN_BYTES: usize = 100 * 1024;

/// Strict-improvement epsilon for best-score tracking.
pub const SCORE_EPSILON: f64 = 1e-6;

/// Lint runs with `max(LINT_TIMEOUT_FLOOR_SECS, timeout_sec / LINT_TIMEOUT_DIVISOR)`.
pub const LINT_TIMEOUT_FLOOR_SECS: u64 = 30;
pub const LINT_TIMEOUT_DIVISOR: u64 = 2;

/// Per-command budget for startSession preflight probes and git queries.
pub const PREFLIGHT_TIMEOUT_SECS: u64 = 5;

/// Diagnostics included in feedback per evaluation.
pub const MAX_FEEDBACK_DIAGNOSTICS: usize = 3;
