//! Session state: the unit of isolation binding a repository, its
//! evaluation commands, the halting policy, and everything accumulated
//! across refinement steps. The engine owns one `Session` exclusively; no
//! state here is shared across sessions.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::candidate::Candidate;
use crate::context::ContextTracker;
use crate::error::EngineError;
use crate::error::Result;
use crate::halt::HaltConfig;
use crate::limits::MAX_RATIONALE_LENGTH;
use crate::outputs::TestCounts;
use crate::score::Weights;

/// How checkpoints capture state. `Cumulative` checkpoints record scalars
/// only; `Snapshot` checkpoints additionally capture and restore the
/// content of every file modified so far. Restoring a cumulative
/// checkpoint does NOT touch the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Cumulative,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Available,
    Unavailable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Build,
    Test,
    Lint,
    Bench,
}

impl CommandKind {
    pub fn label(self) -> &'static str {
        match self {
            CommandKind::Build => "build",
            CommandKind::Test => "test",
            CommandKind::Lint => "lint",
            CommandKind::Bench => "bench",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSpec {
    pub command: String,
    pub status: CommandStatus,
}

/// The four evaluation commands, each optional.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Commands {
    pub build: Option<CommandSpec>,
    pub test: Option<CommandSpec>,
    pub lint: Option<CommandSpec>,
    pub bench: Option<CommandSpec>,
}

impl Commands {
    pub fn get(&self, kind: CommandKind) -> Option<&CommandSpec> {
        match kind {
            CommandKind::Build => self.build.as_ref(),
            CommandKind::Test => self.test.as_ref(),
            CommandKind::Lint => self.lint.as_ref(),
            CommandKind::Bench => self.bench.as_ref(),
        }
    }

    pub fn get_mut(&mut self, kind: CommandKind) -> Option<&mut CommandSpec> {
        match kind {
            CommandKind::Build => self.build.as_mut(),
            CommandKind::Test => self.test.as_mut(),
            CommandKind::Lint => self.lint.as_mut(),
            CommandKind::Bench => self.bench.as_mut(),
        }
    }

    /// A command participates in evaluation unless it is missing or probed
    /// unavailable.
    pub fn runnable(&self, kind: CommandKind) -> Option<&str> {
        self.get(kind)
            .filter(|spec| spec.status != CommandStatus::Unavailable)
            .map(|spec| spec.command.as_str())
    }
}

/// Result of evaluating one submission. Appended to history and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub step: u32,
    #[serde(rename = "okBuild")]
    pub build_ok: bool,
    #[serde(rename = "okLint")]
    pub lint_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perf: Option<f64>,
    pub score: f64,
    pub ema_score: f64,
    pub feedback: Vec<String>,
    pub should_halt: bool,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_suggestion: Option<String>,
}

/// Automatic pre-apply snapshot, pushed after each successful submission
/// and popped LIFO by undo. Holds owned content, not references; the empty
/// string is the did-not-exist sentinel.
#[derive(Debug, Clone)]
pub struct CandidateSnapshot {
    pub step: u32,
    pub candidate: Candidate,
    pub rationale: Option<String>,
    pub pre_change: Vec<(String, String)>,
    pub result: EvalResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub step: u32,
    pub best_score: f64,
    pub ema_score: f64,
    /// Present only for sessions in snapshot mode.
    #[serde(skip)]
    pub files: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One entry per submission, consulted by the error correlator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationContext {
    pub step: u32,
    pub files_modified: Vec<String>,
    pub mode: String,
    pub success: bool,
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub repo_root: PathBuf,
    pub commands: Commands,
    pub timeout_sec: u64,
    pub weights: Weights,
    pub halt: HaltConfig,
    pub ema_alpha: f64,
    pub fuzzy_window: usize,
    pub mode: SessionMode,

    pub step: u32,
    pub best_score: f64,
    pub ema_score: f64,
    pub no_improve_streak: u32,
    pub best_perf: Option<f64>,
    pub rationale: Option<String>,

    pub history: Vec<EvalResult>,
    pub checkpoints: HashMap<String, Checkpoint>,
    pub undo_stack: Vec<CandidateSnapshot>,
    pub tracker: ContextTracker,
    pub iterations: Vec<IterationContext>,
    pub baseline_commit: Option<String>,

    /// Consecutive submissions aborted by hunk mismatches; drives the
    /// switch-to-modify mode suggestion. Reset on any successful apply.
    pub recent_patch_failures: u32,

    /// Combined error output of the most recent evaluation's failing
    /// commands. Feeds suggestFix without re-running anything.
    pub last_error_output: Option<String>,
}

impl Session {
    /// Store bounded rationale notes; overlong input is truncated, not
    /// rejected.
    pub fn set_rationale(&mut self, rationale: Option<String>) {
        self.rationale = rationale.map(|notes| {
            if notes.chars().count() > MAX_RATIONALE_LENGTH {
                notes.chars().take(MAX_RATIONALE_LENGTH).collect()
            } else {
                notes
            }
        });
    }

    pub fn tests_configured(&self) -> bool {
        self.commands.runnable(CommandKind::Test).is_some()
    }

    pub fn bench_configured(&self) -> bool {
        self.commands.runnable(CommandKind::Bench).is_some()
    }
}

pub fn validate_ema_alpha(alpha: f64) -> Result<()> {
    if (0.0..=1.0).contains(&alpha) && alpha.is_finite() {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter {
            name: "emaAlpha".to_string(),
            reason: "must be within [0, 1]".to_string(),
        })
    }
}

pub fn validate_timeout(timeout_sec: u64) -> Result<()> {
    if timeout_sec >= 1 {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter {
            name: "timeoutSec".to_string(),
            reason: "must be at least 1 second".to_string(),
        })
    }
}

pub fn validate_fuzzy_window(window: usize) -> Result<()> {
    if window <= 100 {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter {
            name: "fuzzyWindow".to_string(),
            reason: "must be within [0, 100]".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rationale_is_truncated_to_the_limit() {
        let mut session = test_session();
        session.set_rationale(Some("x".repeat(MAX_RATIONALE_LENGTH + 100)));
        assert_eq!(
            session.rationale.as_ref().map(String::len),
            Some(MAX_RATIONALE_LENGTH)
        );
    }

    #[test]
    fn unavailable_commands_are_not_runnable() {
        let mut session = test_session();
        session.commands.build = Some(CommandSpec {
            command: "make".into(),
            status: CommandStatus::Unavailable,
        });
        assert_eq!(session.commands.runnable(CommandKind::Build), None);

        session.commands.build = Some(CommandSpec {
            command: "make".into(),
            status: CommandStatus::Unknown,
        });
        assert_eq!(session.commands.runnable(CommandKind::Build), Some("make"));
    }

    #[test]
    fn parameter_bounds() {
        assert!(validate_ema_alpha(0.9).is_ok());
        assert!(validate_ema_alpha(1.1).is_err());
        assert!(validate_timeout(0).is_err());
        assert!(validate_fuzzy_window(100).is_ok());
        assert!(validate_fuzzy_window(101).is_err());
    }

    pub(crate) fn test_session() -> Session {
        Session {
            id: Uuid::new_v4(),
            repo_root: PathBuf::from("/repo"),
            commands: Commands::default(),
            timeout_sec: 120,
            weights: Weights::default(),
            halt: HaltConfig::default(),
            ema_alpha: 0.9,
            fuzzy_window: anneal_patch::DEFAULT_FUZZY_WINDOW,
            mode: SessionMode::Cumulative,
            step: 0,
            best_score: 0.0,
            ema_score: 0.0,
            no_improve_streak: 0,
            best_perf: None,
            rationale: None,
            history: Vec::new(),
            checkpoints: HashMap::new(),
            undo_stack: Vec::new(),
            tracker: ContextTracker::new(),
            iterations: Vec::new(),
            baseline_commit: None,
            recent_patch_failures: 0,
            last_error_output: None,
        }
    }
}
