//! The session engine: orchestrates one submission from snapshot through
//! apply, evaluation, scoring, feedback assembly, and the halting decision,
//! plus the recovery primitives (checkpoints, undo, baseline reset) and the
//! read-side operations the generator uses to stay in sync.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use similar::DiffTag;
use similar::TextDiff;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use anneal_patch::FuzzyPatcher;
use anneal_patch::apply_edits;
use anneal_patch::parse_unified_diff;
use anneal_patch::validate_insert_declarations;

use crate::candidate::Candidate;
use crate::context::ContextTracker;
use crate::correlate;
use crate::error::EngineError;
use crate::error::Result;
use crate::exec::CommandOutput;
use crate::exec::CommandRunner;
use crate::exec::tokenize;
use crate::fs::Fs;
use crate::git;
use crate::halt;
use crate::halt::HaltConfig;
use crate::halt::HaltDecision;
use crate::halt::HaltInputs;
use crate::limits::LARGE_SUBMISSION_WARN_BYTES;
use crate::limits::LINT_TIMEOUT_DIVISOR;
use crate::limits::LINT_TIMEOUT_FLOOR_SECS;
use crate::limits::MAX_CANDIDATE_FILES;
use crate::limits::MAX_FEEDBACK_DIAGNOSTICS;
use crate::limits::MAX_FEEDBACK_ITEMS;
use crate::limits::MAX_FILE_READ_PATHS;
use crate::limits::MAX_FILE_SIZE;
use crate::limits::MAX_HINT_LINES;
use crate::limits::PREFLIGHT_TIMEOUT_SECS;
use crate::outputs;
use crate::outputs::TestCounts;
use crate::path_guard::PathGuard;
use crate::score;
use crate::score::Signals;
use crate::score::Weights;
use crate::session::CandidateSnapshot;
use crate::session::Checkpoint;
use crate::session::CommandKind;
use crate::session::CommandSpec;
use crate::session::CommandStatus;
use crate::session::Commands;
use crate::session::EvalResult;
use crate::session::IterationContext;
use crate::session::Session;
use crate::session::SessionMode;
use crate::session::validate_ema_alpha;
use crate::session::validate_fuzzy_window;
use crate::session::validate_timeout;

/// Arguments accepted by startSession after transport-level decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    pub repo_path: String,
    #[serde(default)]
    pub build_cmd: Option<String>,
    #[serde(default)]
    pub test_cmd: Option<String>,
    #[serde(default)]
    pub lint_cmd: Option<String>,
    #[serde(default)]
    pub bench_cmd: Option<String>,
    #[serde(default = "StartParams::default_timeout")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub weights: Weights,
    #[serde(default)]
    pub halt: HaltConfig,
    #[serde(default = "StartParams::default_ema_alpha")]
    pub ema_alpha: f64,
    #[serde(default)]
    pub z_notes: Option<String>,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub preflight: bool,
    #[serde(default)]
    pub fuzzy_window: Option<usize>,
}

impl StartParams {
    fn default_timeout() -> u64 {
        120
    }

    fn default_ema_alpha() -> f64 {
        0.9
    }
}

/// Compact projection of an evaluation returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub step: u32,
    pub score: f64,
    pub ema_score: f64,
    pub best_score: f64,
    pub no_improve_streak: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestCounts>,
    #[serde(rename = "okBuild")]
    pub build_ok: bool,
    #[serde(rename = "okLint")]
    pub lint_ok: bool,
    pub should_halt: bool,
    pub reasons: Vec<String>,
    pub feedback: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<ChangePreview>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePreview {
    pub files_affected: Vec<String>,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub lines_modified: usize,
    pub file_previews: Vec<FilePreview>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePreview {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub content: String,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub line_count: usize,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLines {
    pub file: String,
    pub lines: Vec<String>,
    pub line_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReport {
    pub session_id: Uuid,
    pub repo_root: String,
    pub mode: SessionMode,
    pub step: u32,
    pub best_score: f64,
    pub ema_score: f64,
    pub no_improve_streak: u32,
    pub history_length: usize,
    pub checkpoint_count: usize,
    pub undo_depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_commit: Option<String>,
    pub commands: Commands,
    pub weights: Weights,
    pub halt: HaltConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<EvalResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub step: u32,
    pub best_score: f64,
    pub ema_score: f64,
    pub files_captured: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoReport {
    pub step: u32,
    pub best_score: f64,
    pub ema_score: f64,
    pub restored_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixSuggestion {
    pub analysis: Vec<String>,
    pub diagnostics: Vec<outputs::Diagnostic>,
}

/// One planned per-path content change, computed before anything is
/// written. `old` is `None` when the file does not exist yet.
#[derive(Debug, Clone)]
struct PlannedChange {
    rel: String,
    abs: PathBuf,
    old: Option<String>,
    new: String,
}

pub struct SessionEngine {
    fs: Arc<dyn Fs>,
    runner: CommandRunner,
    guard: PathGuard,
    session: Session,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    /// Validate parameters, probe commands, capture the baseline revision,
    /// and produce a fresh session.
    pub async fn start(
        params: StartParams,
        fs: Arc<dyn Fs>,
        runner: CommandRunner,
    ) -> Result<Self> {
        let repo_root = Path::new(&params.repo_path);
        if !fs.is_dir(repo_root) {
            return Err(EngineError::InvalidParameter {
                name: "repoPath".to_string(),
                reason: format!("{} is not an existing directory", params.repo_path),
            });
        }

        validate_timeout(params.timeout_sec)?;
        params.weights.validate()?;
        params.halt.validate()?;
        validate_ema_alpha(params.ema_alpha)?;
        let fuzzy_window = params
            .fuzzy_window
            .unwrap_or(anneal_patch::DEFAULT_FUZZY_WINDOW);
        validate_fuzzy_window(fuzzy_window)?;

        let guard = PathGuard::new(repo_root, fs.as_ref())?;
        let root = guard.root().to_path_buf();

        let mut commands = Commands::default();
        for (kind, cmd) in [
            (CommandKind::Build, &params.build_cmd),
            (CommandKind::Test, &params.test_cmd),
            (CommandKind::Lint, &params.lint_cmd),
            (CommandKind::Bench, &params.bench_cmd),
        ] {
            let Some(command) = cmd.as_deref().filter(|c| !c.trim().is_empty()) else {
                continue;
            };
            // Unterminated quotes cannot ever run; reject them up front.
            tokenize(command)?;
            let status = if params.preflight {
                probe_status(&runner, command, &root).await
            } else {
                CommandStatus::Unknown
            };
            let spec = CommandSpec {
                command: command.to_string(),
                status,
            };
            match kind {
                CommandKind::Build => commands.build = Some(spec),
                CommandKind::Test => commands.test = Some(spec),
                CommandKind::Lint => commands.lint = Some(spec),
                CommandKind::Bench => commands.bench = Some(spec),
            }
        }

        let baseline_commit = git::capture_baseline(&root).await;
        let id = Uuid::new_v4();
        info!(session = %id, root = %root.display(), "session started");

        let mut session = Session {
            id,
            repo_root: root,
            commands,
            timeout_sec: params.timeout_sec,
            weights: params.weights,
            halt: params.halt,
            ema_alpha: params.ema_alpha,
            fuzzy_window,
            mode: params.mode.unwrap_or(SessionMode::Cumulative),
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
            baseline_commit,
            recent_patch_failures: 0,
            last_error_output: None,
        };
        session.set_rationale(params.z_notes);

        Ok(Self {
            fs,
            runner,
            guard,
            session,
        })
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    // ------------------------------------------------------------------
    // Submission pipeline
    // ------------------------------------------------------------------

    /// Apply a candidate, evaluate the repository, and fold the result into
    /// session state. Apply failures abort before the step counter moves;
    /// evaluation failures are score components, not errors.
    pub async fn submit(
        &mut self,
        candidate: Candidate,
        rationale: Option<String>,
    ) -> Result<SubmitOutcome> {
        let planned = match self.plan_changes(&candidate) {
            Ok(planned) => planned,
            Err(err) => {
                if matches!(err.code(), "HunkMismatch") {
                    self.session.recent_patch_failures += 1;
                }
                return Err(err);
            }
        };

        let targets: Vec<String> = planned.iter().map(|p| p.rel.clone()).collect();
        let stale_warnings = self.session.tracker.stale_warnings(&targets);

        // Did-not-exist paths snapshot as the empty-string sentinel.
        let pre_change: Vec<(String, String)> = planned
            .iter()
            .map(|p| (p.rel.clone(), p.old.clone().unwrap_or_default()))
            .collect();

        self.write_changes(&planned)?;

        let entered_with_patch_failures = self.session.recent_patch_failures;
        self.session.recent_patch_failures = 0;
        self.session.step += 1;
        let step = self.session.step;
        let applied: Vec<(String, PathBuf)> = planned
            .iter()
            .map(|p| (p.rel.clone(), p.abs.clone()))
            .collect();
        self.session
            .tracker
            .note_applied(&applied, step, self.fs.as_ref());
        if rationale.is_some() {
            self.session.set_rationale(rationale);
        }

        debug!(step, files = targets.len(), mode = candidate.mode_name(), "candidate applied");

        // Evaluate in fixed order; skipped commands read as clean successes.
        let build_out = self.run_command(CommandKind::Build).await;
        let test_out = self.run_command(CommandKind::Test).await;
        let lint_out = self.run_command(CommandKind::Lint).await;
        let bench_out = self.run_command(CommandKind::Bench).await;

        let tests_configured = self.session.tests_configured();
        let bench_configured = self.session.bench_configured();
        let tests = if tests_configured {
            outputs::parse_test_output(&test_out.stdout, &test_out.stderr)
        } else {
            None
        };
        let perf = if bench_configured {
            outputs::parse_perf_value(&bench_out.stdout, &bench_out.stderr)
        } else {
            None
        };

        let signals = Signals {
            build_ok: build_out.ok,
            lint_ok: lint_out.ok,
            tests,
            tests_configured,
            perf,
            bench_configured,
        };
        let score = score::score(&self.session.weights, &signals, &mut self.session.best_perf);
        let previous_ema = self.session.history.last().map(|h| h.ema_score);
        let ema = score::ema_update(previous_ema, score, self.session.ema_alpha);
        let (best, streak) = score::track_improvement(
            self.session.best_score,
            self.session.no_improve_streak,
            score,
        );
        self.session.best_score = best;
        self.session.no_improve_streak = streak;
        self.session.ema_score = ema;

        let success = build_out.ok && tests.is_none_or(|t| t.all_passed()) && lint_out.ok;
        self.session.iterations.push(IterationContext {
            step,
            files_modified: targets.clone(),
            mode: candidate.mode_name().to_string(),
            success,
        });

        let mut provisional = EvalResult {
            step,
            build_ok: build_out.ok,
            lint_ok: lint_out.ok,
            tests,
            perf,
            score,
            ema_score: ema,
            feedback: Vec::new(),
            should_halt: false,
            reasons: Vec::new(),
            mode_suggestion: None,
        };

        let feedback = self.assemble_feedback(
            stale_warnings,
            &build_out,
            &test_out,
            &lint_out,
            &bench_out,
            &provisional,
        );
        provisional.feedback = feedback;

        let decision = halt::evaluate(
            &self.session.halt,
            &HaltInputs {
                step,
                score,
                tests: provisional.tests.as_ref(),
                tests_configured,
                no_improve_streak: streak,
            },
        );
        provisional.should_halt = decision.should_halt;
        provisional.reasons = decision.reasons;
        provisional.mode_suggestion = self.mode_suggestion(
            &candidate,
            entered_with_patch_failures,
        );

        self.session.history.push(provisional.clone());
        self.session.undo_stack.push(CandidateSnapshot {
            step,
            candidate,
            rationale: self.session.rationale.clone(),
            pre_change,
            result: provisional.clone(),
            created_at: Utc::now(),
        });

        info!(
            step,
            score,
            ema,
            should_halt = provisional.should_halt,
            "evaluation complete"
        );

        Ok(SubmitOutcome {
            step,
            score,
            ema_score: ema,
            best_score: self.session.best_score,
            no_improve_streak: self.session.no_improve_streak,
            tests: provisional.tests,
            build_ok: provisional.build_ok,
            lint_ok: provisional.lint_ok,
            should_halt: provisional.should_halt,
            reasons: provisional.reasons,
            feedback: provisional.feedback,
            mode_suggestion: provisional.mode_suggestion,
        })
    }

    /// Same checks as submit, but nothing is written and nothing runs.
    pub fn validate(&self, candidate: &Candidate) -> ValidationReport {
        let planned = match self.plan_changes(candidate) {
            Ok(planned) => planned,
            Err(err) => {
                return ValidationReport {
                    valid: false,
                    errors: vec![format!("{}: {err}", err.code())],
                    warnings: Vec::new(),
                    preview: None,
                };
            }
        };

        let targets: Vec<String> = planned.iter().map(|p| p.rel.clone()).collect();
        let mut warnings = self.session.tracker.stale_warnings(&targets);
        if let Some(warning) = large_submission_warning(candidate) {
            warnings.push(warning);
        }

        let mut lines_added = 0;
        let mut lines_removed = 0;
        let mut lines_modified = 0;
        let mut file_previews = Vec::new();
        for change in &planned {
            let old = change.old.as_deref().unwrap_or("");
            let diff = TextDiff::from_lines(old, change.new.as_str());
            for op in diff.ops() {
                match op.tag() {
                    DiffTag::Insert => lines_added += op.new_range().len(),
                    DiffTag::Delete => lines_removed += op.old_range().len(),
                    DiffTag::Replace => {
                        let old_len = op.old_range().len();
                        let new_len = op.new_range().len();
                        lines_modified += old_len.min(new_len);
                        lines_added += new_len.saturating_sub(old_len);
                        lines_removed += old_len.saturating_sub(new_len);
                    }
                    DiffTag::Equal => {}
                }
            }
            let rendered = diff
                .unified_diff()
                .context_radius(2)
                .header(&format!("a/{}", change.rel), &format!("b/{}", change.rel))
                .to_string();
            file_previews.push(FilePreview {
                path: change.rel.clone(),
                diff: clip_lines(&rendered, 40),
            });
        }

        ValidationReport {
            valid: true,
            errors: Vec::new(),
            warnings,
            preview: Some(ChangePreview {
                files_affected: targets,
                lines_added,
                lines_removed,
                lines_modified,
                file_previews,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Read-side operations
    // ------------------------------------------------------------------

    pub fn get_file_content(&mut self, paths: &[String]) -> Result<BTreeMap<String, FileEntry>> {
        if paths.len() > MAX_FILE_READ_PATHS {
            return Err(EngineError::TooManyFiles {
                count: paths.len(),
                limit: MAX_FILE_READ_PATHS,
            });
        }
        let mut out = BTreeMap::new();
        for rel in paths {
            let abs = self.guard.resolve(rel, self.fs.as_ref())?;
            let content = self.fs.read(&abs).map_err(|_| EngineError::FileNotFound {
                path: rel.clone(),
            })?;
            let stat = self
                .fs
                .stat(&abs)
                .map_err(|e| EngineError::io("failed to stat file", rel.clone(), e))?;
            self.session.tracker.note_read(rel, &content);
            out.insert(
                rel.clone(),
                FileEntry {
                    metadata: FileMetadata {
                        line_count: content.lines().count(),
                        size_bytes: stat.size_bytes,
                        last_modified: stat.modified,
                    },
                    content,
                },
            );
        }
        Ok(out)
    }

    pub fn get_file_lines(
        &self,
        file: &str,
        start_line: usize,
        end_line: usize,
    ) -> Result<FileLines> {
        let abs = self.guard.resolve(file, self.fs.as_ref())?;
        let content = self.fs.read(&abs).map_err(|_| EngineError::FileNotFound {
            path: file.to_string(),
        })?;
        let all: Vec<&str> = content.lines().collect();
        if start_line < 1 || end_line < start_line || end_line > all.len() {
            return Err(EngineError::Patch(anneal_patch::PatchError::InvalidRange {
                start: start_line,
                end: end_line,
                max: all.len(),
            }));
        }
        let lines = all[start_line - 1..end_line]
            .iter()
            .enumerate()
            .map(|(i, text)| format!("{}: {text}", start_line + i))
            .collect();
        Ok(FileLines {
            file: file.to_string(),
            lines,
            line_count: all.len(),
        })
    }

    pub fn get_state(&self) -> StateReport {
        StateReport {
            session_id: self.session.id,
            repo_root: self.session.repo_root.display().to_string(),
            mode: self.session.mode,
            step: self.session.step,
            best_score: self.session.best_score,
            ema_score: self.session.ema_score,
            no_improve_streak: self.session.no_improve_streak,
            history_length: self.session.history.len(),
            checkpoint_count: self.session.checkpoints.len(),
            undo_depth: self.session.undo_stack.len(),
            baseline_commit: self.session.baseline_commit.clone(),
            commands: self.session.commands.clone(),
            weights: self.session.weights,
            halt: self.session.halt,
            last_result: self.session.history.last().cloned(),
        }
    }

    pub fn should_halt(&self) -> HaltDecision {
        let last = self.session.history.last();
        halt::evaluate(
            &self.session.halt,
            &HaltInputs {
                step: self.session.step,
                score: last.map(|h| h.score).unwrap_or(0.0),
                tests: last.and_then(|h| h.tests.as_ref()),
                tests_configured: self.session.tests_configured(),
                no_improve_streak: self.session.no_improve_streak,
            },
        )
    }

    pub fn get_suggestions(&self) -> Vec<String> {
        match self.session.history.last() {
            Some(last) => {
                let mut out = last.feedback.clone();
                out.extend(last.reasons.iter().cloned());
                if let Some(suggestion) = &last.mode_suggestion {
                    out.push(suggestion.clone());
                }
                dedupe_preserving_order(out)
            }
            None => vec!["no evaluations yet; submit a candidate first".to_string()],
        }
    }

    /// Re-derive failure analysis from the most recent evaluation without
    /// running anything.
    pub fn suggest_fix(&self) -> FixSuggestion {
        let mut analysis = Vec::new();
        let mut diagnostics = Vec::new();
        match &self.session.last_error_output {
            Some(error_output) => {
                let correlation = correlate::correlate(error_output, &self.session.iterations);
                analysis.extend(correlation.lines);
                analysis.extend(correlate::detect_cascading(&self.session.history));
                diagnostics = outputs::parse_build_diagnostics(error_output);
                diagnostics.truncate(MAX_FEEDBACK_DIAGNOSTICS);
                if analysis.is_empty() && diagnostics.is_empty() {
                    analysis.push(
                        "the last evaluation failed but referenced no recognizable files"
                            .to_string(),
                    );
                }
            }
            None => analysis.push("the last evaluation had no failing commands".to_string()),
        }
        FixSuggestion {
            analysis,
            diagnostics,
        }
    }

    // ------------------------------------------------------------------
    // Recovery primitives
    // ------------------------------------------------------------------

    pub fn save_checkpoint(&mut self, description: Option<String>) -> Result<CheckpointSummary> {
        let id = Uuid::new_v4().to_string();
        let files = match self.session.mode {
            SessionMode::Cumulative => None,
            SessionMode::Snapshot => {
                let mut captured = HashMap::new();
                let modified: Vec<String> = self
                    .session
                    .tracker
                    .modified_files()
                    .map(str::to_string)
                    .collect();
                for rel in modified {
                    let abs = self.guard.resolve(&rel, self.fs.as_ref())?;
                    if let Ok(content) = self.fs.read(&abs) {
                        captured.insert(rel, content);
                    }
                }
                Some(captured)
            }
        };
        let checkpoint = Checkpoint {
            id: id.clone(),
            created_at: Utc::now(),
            step: self.session.step,
            best_score: self.session.best_score,
            ema_score: self.session.ema_score,
            files,
            description,
        };
        let summary = summarize_checkpoint(&checkpoint);
        self.session.checkpoints.insert(id, checkpoint);
        Ok(summary)
    }

    /// Restore the scalar fields of a checkpoint. Only snapshot-mode
    /// checkpoints carry file contents; in cumulative mode the working
    /// tree is left exactly as it is.
    pub fn restore_checkpoint(&mut self, id: &str) -> Result<CheckpointSummary> {
        let checkpoint = self
            .session
            .checkpoints
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::CheckpointNotFound { id: id.to_string() })?;

        self.session.step = checkpoint.step;
        self.session.best_score = checkpoint.best_score;
        self.session.ema_score = checkpoint.ema_score;

        if let Some(files) = &checkpoint.files {
            for (rel, content) in files {
                let abs = self.guard.resolve(rel, self.fs.as_ref())?;
                if let Some(parent) = abs.parent() {
                    self.fs
                        .ensure_dir(parent)
                        .map_err(|e| EngineError::io("failed to create directory", rel.clone(), e))?;
                }
                self.fs
                    .write(&abs, content)
                    .map_err(|e| EngineError::io("failed to restore file", rel.clone(), e))?;
                self.session
                    .tracker
                    .refresh_snapshot(rel, &abs, self.fs.as_ref());
            }
        }
        Ok(summarize_checkpoint(&checkpoint))
    }

    pub fn list_checkpoints(&self) -> Vec<CheckpointSummary> {
        let mut summaries: Vec<CheckpointSummary> = self
            .session
            .checkpoints
            .values()
            .map(summarize_checkpoint)
            .collect();
        summaries.sort_by_key(|c| c.created_at);
        summaries
    }

    /// Pop the most recent candidate: restore every touched path to its
    /// pre-submission content, then re-derive the scalar state purely from
    /// the remaining history.
    pub fn undo_last(&mut self) -> Result<UndoReport> {
        let snapshot = self
            .session
            .undo_stack
            .pop()
            .ok_or_else(|| EngineError::Validation("nothing to undo".to_string()))?;

        let mut restored = Vec::new();
        for (rel, prev_content) in &snapshot.pre_change {
            let abs = self.guard.resolve(rel, self.fs.as_ref())?;
            if prev_content.is_empty() {
                // The sentinel: this path did not exist before the step.
                if self.fs.exists(&abs) {
                    self.fs
                        .remove(&abs)
                        .map_err(|e| EngineError::io("failed to remove file", rel.clone(), e))?;
                }
            } else {
                if let Some(parent) = abs.parent() {
                    self.fs
                        .ensure_dir(parent)
                        .map_err(|e| EngineError::io("failed to create directory", rel.clone(), e))?;
                }
                self.fs
                    .write(&abs, prev_content)
                    .map_err(|e| EngineError::io("failed to restore file", rel.clone(), e))?;
            }
            restored.push(rel.clone());
        }

        self.session.step = snapshot.step.saturating_sub(1);
        self.session.history.pop();
        self.session.iterations.pop();

        // Forward replay over the kept prefix reproduces exactly the
        // scalars as they stood after the previous step.
        let mut best = 0.0f64;
        let mut streak = 0u32;
        for entry in &self.session.history {
            let (new_best, new_streak) = score::track_improvement(best, streak, entry.score);
            best = new_best;
            streak = new_streak;
        }
        self.session.best_score = best;
        self.session.no_improve_streak = streak;
        self.session.ema_score = self
            .session
            .history
            .last()
            .map(|h| h.ema_score)
            .unwrap_or(0.0);

        let undone: Vec<String> = snapshot
            .pre_change
            .iter()
            .map(|(rel, _)| rel.clone())
            .collect();
        self.session.tracker.forget_modified(&undone);
        let marks: Vec<(String, u32)> = self
            .session
            .iterations
            .iter()
            .flat_map(|it| {
                it.files_modified
                    .iter()
                    .map(|p| (p.clone(), it.step))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (path, step) in marks {
            self.session.tracker.mark_modified(&path, step);
        }
        for rel in &restored {
            let abs = self.guard.resolve(rel, self.fs.as_ref())?;
            self.session
                .tracker
                .refresh_snapshot(rel, &abs, self.fs.as_ref());
        }

        info!(step = self.session.step, files = restored.len(), "undid last candidate");

        Ok(UndoReport {
            step: self.session.step,
            best_score: self.session.best_score,
            ema_score: self.session.ema_score,
            restored_paths: restored,
        })
    }

    /// Hard-reset the repository to the revision captured at session start
    /// and zero the refinement state.
    pub async fn reset_to_baseline(&mut self) -> Result<StateReport> {
        let commit = self.session.baseline_commit.clone().ok_or_else(|| {
            EngineError::Validation(
                "no baseline revision was captured at session start".to_string(),
            )
        })?;
        git::reset_to_commit(&self.session.repo_root, &commit).await?;

        self.session.step = 0;
        self.session.best_score = 0.0;
        self.session.ema_score = 0.0;
        self.session.no_improve_streak = 0;
        self.session.history.clear();
        self.session.checkpoints.clear();
        self.session.undo_stack.clear();
        self.session.iterations.clear();
        self.session.tracker = ContextTracker::new();
        self.session.last_error_output = None;

        info!(commit = %commit, "session reset to baseline");
        Ok(self.get_state())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn plan_changes(&self, candidate: &Candidate) -> Result<Vec<PlannedChange>> {
        match candidate {
            Candidate::Diff { files } => {
                check_file_count(files.len())?;
                let mut planned = Vec::new();
                for spec in files {
                    check_payload_size(&spec.path, spec.diff.len() as u64)?;
                    let abs = self.guard.resolve(&spec.path, self.fs.as_ref())?;
                    let parsed = parse_unified_diff(&spec.diff)?;
                    let hunks: Vec<_> = parsed.into_iter().flat_map(|f| f.hunks).collect();
                    if hunks.is_empty() {
                        return Err(EngineError::Patch(
                            anneal_patch::PatchError::InvalidDiff(format!(
                                "diff for {} contains no hunks",
                                spec.path
                            )),
                        ));
                    }
                    let old = self.fs.read(&abs).ok();
                    let patcher = FuzzyPatcher::new(self.session.fuzzy_window);
                    let new = patcher.apply(old.as_deref().unwrap_or(""), &hunks)?;
                    check_result_size(&spec.path, new.len() as u64)?;
                    planned.push(PlannedChange {
                        rel: spec.path.clone(),
                        abs,
                        old,
                        new,
                    });
                }
                Ok(planned)
            }
            Candidate::Patch { patch } => {
                check_payload_size("patch", patch.len() as u64)?;
                if !patch.contains("@@") {
                    return Err(EngineError::Patch(anneal_patch::PatchError::InvalidDiff(
                        "patch must contain at least one @@ hunk".to_string(),
                    )));
                }
                let parsed = parse_unified_diff(patch)?;
                check_file_count(parsed.len())?;
                let mut planned = Vec::new();
                for file in parsed {
                    if file.path.is_empty() {
                        return Err(EngineError::Patch(anneal_patch::PatchError::InvalidDiff(
                            "patch names no target file".to_string(),
                        )));
                    }
                    let abs = self.guard.resolve(&file.path, self.fs.as_ref())?;
                    let old = self.fs.read(&abs).ok();
                    let patcher = FuzzyPatcher::new(self.session.fuzzy_window);
                    let new = patcher.apply(old.as_deref().unwrap_or(""), &file.hunks)?;
                    check_result_size(&file.path, new.len() as u64)?;
                    planned.push(PlannedChange {
                        rel: file.path,
                        abs,
                        old,
                        new,
                    });
                }
                Ok(planned)
            }
            Candidate::Files { files } => {
                check_file_count(files.len())?;
                let mut planned = Vec::new();
                for spec in files {
                    check_payload_size(&spec.path, spec.content.len() as u64)?;
                    let abs = self.guard.resolve(&spec.path, self.fs.as_ref())?;
                    let old = self.fs.read(&abs).ok();
                    planned.push(PlannedChange {
                        rel: spec.path.clone(),
                        abs,
                        old,
                        new: spec.content.clone(),
                    });
                }
                Ok(planned)
            }
            Candidate::Create { files } => {
                check_file_count(files.len())?;
                let mut planned = Vec::new();
                for spec in files {
                    check_payload_size(&spec.path, spec.content.len() as u64)?;
                    let abs = self.guard.resolve(&spec.path, self.fs.as_ref())?;
                    if self.fs.exists(&abs) {
                        return Err(EngineError::FileExists {
                            path: spec.path.clone(),
                        });
                    }
                    planned.push(PlannedChange {
                        rel: spec.path.clone(),
                        abs,
                        old: None,
                        new: spec.content.clone(),
                    });
                }
                Ok(planned)
            }
            Candidate::Modify { files } => {
                check_file_count(files.len())?;
                let mut planned = Vec::new();
                for spec in files {
                    let abs = self.guard.resolve(&spec.file, self.fs.as_ref())?;
                    let old = self.fs.read(&abs).map_err(|_| EngineError::FileNotFound {
                        path: spec.file.clone(),
                    })?;
                    validate_insert_declarations(&old, &spec.edits)?;
                    let new = apply_edits(&old, &spec.edits)?;
                    check_result_size(&spec.file, new.len() as u64)?;
                    planned.push(PlannedChange {
                        rel: spec.file.clone(),
                        abs,
                        old: Some(old),
                        new,
                    });
                }
                Ok(planned)
            }
        }
    }

    fn write_changes(&self, planned: &[PlannedChange]) -> Result<()> {
        for change in planned {
            if let Some(parent) = change.abs.parent() {
                self.fs
                    .ensure_dir(parent)
                    .map_err(|e| EngineError::io("failed to create directory", change.rel.clone(), e))?;
            }
            self.fs
                .write(&change.abs, &change.new)
                .map_err(|e| EngineError::io("failed to write file", change.rel.clone(), e))?;
        }
        Ok(())
    }

    async fn run_command(&self, kind: CommandKind) -> CommandOutput {
        let Some(command) = self.session.commands.runnable(kind) else {
            return CommandOutput::synthetic_success();
        };
        let timeout_sec = match kind {
            CommandKind::Lint => LINT_TIMEOUT_FLOOR_SECS
                .max(self.session.timeout_sec / LINT_TIMEOUT_DIVISOR),
            _ => self.session.timeout_sec,
        };
        self.runner
            .run(
                command,
                &self.session.repo_root,
                Duration::from_secs(timeout_sec),
            )
            .await
    }

    fn assemble_feedback(
        &mut self,
        stale_warnings: Vec<String>,
        build_out: &CommandOutput,
        test_out: &CommandOutput,
        lint_out: &CommandOutput,
        bench_out: &CommandOutput,
        provisional: &EvalResult,
    ) -> Vec<String> {
        let mut feedback = stale_warnings;

        feedback.push(status_line("build", build_out, self.session.commands.runnable(CommandKind::Build).is_some()));
        if self.session.tests_configured() {
            feedback.push(match provisional.tests {
                Some(t) => format!("tests: {}/{} passed", t.passed, t.total),
                None => "tests: command produced no parseable summary".to_string(),
            });
        }
        if self.session.commands.runnable(CommandKind::Lint).is_some() {
            feedback.push(status_line("lint", lint_out, true));
        }
        if self.session.bench_configured() {
            feedback.push(match provisional.perf {
                Some(v) => match self.session.best_perf {
                    Some(best) => format!("perf: {v} (best {best})"),
                    None => format!("perf: {v}"),
                },
                None => "perf: bench produced no parseable reading".to_string(),
            });
        }

        // Error-to-change correlation over the failing commands' output.
        let mut error_text = String::new();
        for (out, failed) in [
            (build_out, !build_out.ok),
            (
                test_out,
                !test_out.ok || provisional.tests.is_some_and(|t| !t.all_passed()),
            ),
            (lint_out, !lint_out.ok),
            (bench_out, !bench_out.ok),
        ] {
            if failed {
                error_text.push_str(&out.stdout);
                error_text.push('\n');
                error_text.push_str(&out.stderr);
                error_text.push('\n');
            }
        }

        if error_text.trim().is_empty() {
            self.session.last_error_output = None;
        } else {
            let correlation = correlate::correlate(&error_text, &self.session.iterations);
            feedback.extend(correlation.lines);

            let mut window: Vec<EvalResult> = self
                .session
                .history
                .iter()
                .rev()
                .take(2)
                .rev()
                .cloned()
                .collect();
            window.push(provisional.clone());
            feedback.extend(correlate::detect_cascading(&window));

            let mut diagnostics = outputs::parse_build_diagnostics(&error_text);
            diagnostics.truncate(MAX_FEEDBACK_DIAGNOSTICS);
            for diag in &diagnostics {
                let mut line = format!(
                    "{}:{}:{} error{}: {}",
                    diag.file,
                    diag.line,
                    diag.column,
                    diag.code
                        .as_deref()
                        .map(|c| format!(" {c}"))
                        .unwrap_or_default(),
                    diag.message
                );
                if let Some(hint) = outputs::diagnostic_suggestion(diag.code.as_deref()) {
                    line.push_str(&format!(" ({hint})"));
                }
                feedback.push(line);
            }

            for hint in outputs::extract_hint_lines(&error_text, MAX_HINT_LINES) {
                feedback.push(hint.text);
            }
            self.session.last_error_output = Some(error_text);
        }

        let mut feedback = dedupe_preserving_order(feedback);
        feedback.truncate(MAX_FEEDBACK_ITEMS);
        feedback
    }

    fn mode_suggestion(
        &self,
        candidate: &Candidate,
        entered_with_patch_failures: u32,
    ) -> Option<String> {
        if let Some(warning) = large_submission_warning(candidate) {
            return Some(warning);
        }
        if entered_with_patch_failures >= 2 && candidate.uses_patch_format() {
            return Some(
                "repeated hunk mismatches; `modify` mode with line-addressed edits avoids \
                 context matching entirely"
                    .to_string(),
            );
        }
        None
    }
}

async fn probe_status(runner: &CommandRunner, command: &str, cwd: &Path) -> CommandStatus {
    let out = runner
        .run(command, cwd, Duration::from_secs(PREFLIGHT_TIMEOUT_SECS))
        .await;
    if out.timed_out {
        // The command exists but did not finish inside the probe budget.
        return CommandStatus::Unknown;
    }
    let stderr = out.stderr.to_lowercase();
    if stderr.contains("command not found")
        || stderr.contains("not recognized")
        || stderr.contains("no such file")
        || stderr.contains("failed to spawn")
    {
        CommandStatus::Unavailable
    } else {
        CommandStatus::Available
    }
}

fn status_line(label: &str, out: &CommandOutput, configured: bool) -> String {
    if !configured {
        return format!("{label}: skipped (not configured)");
    }
    if out.ok {
        format!("{label}: ok")
    } else if out.timed_out {
        format!("{label}: {}", out.stderr.lines().next().unwrap_or("timed out"))
    } else {
        format!("{label}: failed (exit {})", out.exit_code)
    }
}

fn large_submission_warning(candidate: &Candidate) -> Option<String> {
    if let Candidate::Files { files } = candidate {
        let total: usize = files.iter().map(|f| f.content.len()).sum();
        if total > LARGE_SUBMISSION_WARN_BYTES {
            return Some(format!(
                "full-content submission totals {total} bytes; prefer `modify` mode with \
                 targeted edits for changes this large"
            ));
        }
    }
    None
}

fn check_file_count(count: usize) -> Result<()> {
    if count > MAX_CANDIDATE_FILES {
        Err(EngineError::TooManyFiles {
            count,
            limit: MAX_CANDIDATE_FILES,
        })
    } else {
        Ok(())
    }
}

fn check_payload_size(path: &str, size: u64) -> Result<()> {
    if size > MAX_FILE_SIZE {
        Err(EngineError::FileTooLarge {
            path: path.to_string(),
            size,
            limit: MAX_FILE_SIZE,
        })
    } else {
        Ok(())
    }
}

/// Resulting content at exactly the limit is accepted; one byte over is
/// not.
fn check_result_size(path: &str, size: u64) -> Result<()> {
    check_payload_size(path, size)
}

fn summarize_checkpoint(checkpoint: &Checkpoint) -> CheckpointSummary {
    CheckpointSummary {
        id: checkpoint.id.clone(),
        created_at: checkpoint.created_at,
        step: checkpoint.step,
        best_score: checkpoint.best_score,
        ema_score: checkpoint.ema_score,
        files_captured: checkpoint.files.as_ref().map(HashMap::len).unwrap_or(0),
        description: checkpoint.description.clone(),
    }
}

fn dedupe_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn clip_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        text.to_string()
    } else {
        let mut out = lines[..max_lines].join("\n");
        out.push_str("\n…");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let items = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
        ];
        assert_eq!(dedupe_preserving_order(items), vec!["a", "b", "c"]);
    }

    #[test]
    fn clip_lines_appends_ellipsis() {
        let text = "1\n2\n3\n4";
        assert_eq!(clip_lines(text, 2), "1\n2\n…");
        assert_eq!(clip_lines(text, 10), text);
    }

    #[test]
    fn status_lines_cover_outcomes() {
        let ok = CommandOutput::synthetic_success();
        assert_eq!(status_line("build", &ok, true), "build: ok");

        let failed = CommandOutput {
            ok: false,
            exit_code: 2,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        };
        assert_eq!(status_line("lint", &failed, true), "lint: failed (exit 2)");

        let timed_out = CommandOutput {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: "Command timed out after 30s".to_string(),
            timed_out: true,
        };
        assert_eq!(
            status_line("test", &timed_out, true),
            "test: Command timed out after 30s"
        );
    }

    #[test]
    fn large_files_submission_warns() {
        let candidate = Candidate::Files {
            files: vec![crate::candidate::FileSpec {
                path: "big.txt".into(),
                content: "x".repeat(LARGE_SUBMISSION_WARN_BYTES + 1),
            }],
        };
        assert!(large_submission_warning(&candidate).is_some());

        let candidate = Candidate::Files {
            files: vec![crate::candidate::FileSpec {
                path: "small.txt".into(),
                content: "x".into(),
            }],
        };
        assert!(large_submission_warning(&candidate).is_none());
    }
}
