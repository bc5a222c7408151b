use std::io;

use thiserror::Error;
use uuid::Uuid;

use anneal_patch::PatchError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Caller-visible error taxonomy. Every variant projects to a short stable
/// code plus a human reason; some carry a suggestion for the generator.
///
/// Validation and apply-time errors abort the current operation without
/// mutating session state. Evaluation failures (non-zero exits, timeouts)
/// are not errors at all; they flow into scoring and feedback.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("path {path:?} resolves outside the session root")]
    PathEscaped { path: String },

    #[error("{path:?} is {size} bytes which exceeds the {limit} byte limit")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("{count} paths supplied, over the limit of {limit}")]
    TooManyFiles { count: usize, limit: usize },

    #[error("file already exists: {path:?}")]
    FileExists { path: String },

    #[error("file not found: {path:?}")]
    FileNotFound { path: String },

    #[error("checkpoint not found: {id:?}")]
    CheckpointNotFound { id: String },

    #[error("no session with id {0}")]
    UnknownSession(Uuid),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("{context} ({path}): {source}")]
    Io {
        context: String,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    pub fn io(context: impl Into<String>, path: impl Into<String>, source: io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::PathEscaped { .. } => "PathEscaped",
            EngineError::FileTooLarge { .. } => "FileTooLarge",
            EngineError::TooManyFiles { .. } => "TooManyFiles",
            EngineError::FileExists { .. } => "FileExists",
            EngineError::FileNotFound { .. } => "FileNotFound",
            EngineError::CheckpointNotFound { .. } => "CheckpointNotFound",
            EngineError::UnknownSession(_) => "UnknownSession",
            EngineError::InvalidParameter { .. } => "InvalidParameter",
            EngineError::Validation(_) => "ValidationError",
            EngineError::Patch(patch) => match patch {
                PatchError::InvalidDiff(_) => "InvalidDiff",
                PatchError::HunkMismatch { .. } => "HunkMismatch",
                PatchError::ReplaceNotFound { .. } => "ReplaceNotFound",
                PatchError::InvalidLine { .. } => "InvalidLine",
                PatchError::InvalidRange { .. } => "InvalidRange",
                PatchError::DuplicateDeclaration { .. } => "DuplicateDeclaration",
            },
            EngineError::Io { .. } => "IoError",
        }
    }

    /// Optional recovery hint surfaced next to the error message.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            EngineError::PathEscaped { .. } => {
                Some("Use paths relative to the session's repository root.")
            }
            EngineError::FileExists { .. } => {
                Some("Use `files` or `modify` mode to change an existing file.")
            }
            EngineError::FileNotFound { .. } => {
                Some("Use `create` mode for new files, or check the path with getFileContent.")
            }
            EngineError::Patch(PatchError::HunkMismatch { .. }) => Some(
                "Re-read the file with getFileContent and regenerate the diff, or switch to \
                 `modify` mode with explicit line edits.",
            ),
            EngineError::Patch(PatchError::ReplaceNotFound { .. }) => {
                Some("Re-read the file; the text to replace is not present verbatim.")
            }
            EngineError::Patch(PatchError::DuplicateDeclaration { .. }) => Some(
                "A declaration with this name already exists nearby. Edit it in place instead \
                 of inserting a second copy.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = EngineError::PathEscaped {
            path: "../x".into(),
        };
        assert_eq!(err.code(), "PathEscaped");

        let err = EngineError::Patch(PatchError::InvalidDiff("x".into()));
        assert_eq!(err.code(), "InvalidDiff");

        let err = EngineError::UnknownSession(Uuid::nil());
        assert_eq!(err.code(), "UnknownSession");
        assert!(err.suggestion().is_none());
    }

    #[test]
    fn hunk_mismatch_carries_a_suggestion() {
        let err = EngineError::Patch(PatchError::HunkMismatch {
            line: 1,
            expected: String::new(),
            actual: String::new(),
            best_score_pct: 10,
            window: 5,
        });
        assert_eq!(err.code(), "HunkMismatch");
        assert!(err.suggestion().is_some());
    }
}
