//! Wire-facing parameter types for every tool, with JSON schemas generated
//! from the same structs that deserialize the arguments. Mirrors of the
//! engine's types keep the schema surface decoupled from core internals;
//! `From` impls carry values across.

use mcp_types::Tool;
use mcp_types::ToolInputSchema;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::Deserialize;

use anneal_core::candidate::Candidate;
use anneal_core::candidate::DiffSpec;
use anneal_core::candidate::FileSpec;
use anneal_core::candidate::ModifySpec;
use anneal_core::engine::StartParams;
use anneal_core::halt::HaltConfig;
use anneal_core::score::Weights;
use anneal_core::session::SessionMode;
use anneal_patch::EditOperation;

/// Arguments for `start_session`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartSessionToolParam {
    /// Absolute path of the repository the session operates on.
    pub repo_path: String,
    /// Build command, tokenized without a shell (e.g. "cargo build").
    #[serde(default)]
    pub build_cmd: Option<String>,
    /// Test command; its summary output drives the test score component.
    #[serde(default)]
    pub test_cmd: Option<String>,
    /// Lint command; runs with a shortened timeout.
    #[serde(default)]
    pub lint_cmd: Option<String>,
    /// Benchmark command; a lower reading is treated as better.
    #[serde(default)]
    pub bench_cmd: Option<String>,
    /// Per-command timeout in seconds (default 120).
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub weights: Option<WeightsParam>,
    #[serde(default)]
    pub halt: Option<HaltParam>,
    /// EMA smoothing factor in [0, 1] (default 0.9).
    #[serde(default)]
    pub ema_alpha: Option<f64>,
    /// Initial rationale notes, truncated past 4000 characters.
    #[serde(default)]
    pub z_notes: Option<String>,
    /// `snapshot` makes checkpoints capture and restore file contents;
    /// `cumulative` (default) restores scalars only.
    #[serde(default)]
    pub mode: Option<SessionModeParam>,
    /// Probe each command once (5s budget) to classify availability.
    #[serde(default)]
    pub preflight: Option<bool>,
    /// Fuzzy hunk search window in lines, 0-100 (default 5).
    #[serde(default)]
    pub fuzzy_window: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct WeightsParam {
    #[serde(default)]
    pub build: Option<f64>,
    #[serde(default)]
    pub test: Option<f64>,
    #[serde(default)]
    pub lint: Option<f64>,
    #[serde(default)]
    pub perf: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HaltParam {
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub pass_threshold: Option<f64>,
    #[serde(default)]
    pub patience_no_improve: Option<u32>,
    #[serde(default)]
    pub min_steps: Option<u32>,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SessionModeParam {
    Cumulative,
    Snapshot,
}

impl From<SessionModeParam> for SessionMode {
    fn from(value: SessionModeParam) -> Self {
        match value {
            SessionModeParam::Cumulative => SessionMode::Cumulative,
            SessionModeParam::Snapshot => SessionMode::Snapshot,
        }
    }
}

impl From<StartSessionToolParam> for StartParams {
    fn from(value: StartSessionToolParam) -> Self {
        let defaults = Weights::default();
        let weights = value
            .weights
            .map(|w| Weights {
                build: w.build.unwrap_or(defaults.build),
                test: w.test.unwrap_or(defaults.test),
                lint: w.lint.unwrap_or(defaults.lint),
                perf: w.perf.unwrap_or(defaults.perf),
            })
            .unwrap_or(defaults);
        let halt_defaults = HaltConfig::default();
        let halt = value
            .halt
            .map(|h| HaltConfig {
                max_steps: h.max_steps.unwrap_or(halt_defaults.max_steps),
                pass_threshold: h.pass_threshold.unwrap_or(halt_defaults.pass_threshold),
                patience_no_improve: h
                    .patience_no_improve
                    .unwrap_or(halt_defaults.patience_no_improve),
                min_steps: h.min_steps.unwrap_or(halt_defaults.min_steps),
            })
            .unwrap_or(halt_defaults);

        StartParams {
            repo_path: value.repo_path,
            build_cmd: value.build_cmd,
            test_cmd: value.test_cmd,
            lint_cmd: value.lint_cmd,
            bench_cmd: value.bench_cmd,
            timeout_sec: value.timeout_sec.unwrap_or(120),
            weights,
            halt,
            ema_alpha: value.ema_alpha.unwrap_or(0.9),
            z_notes: value.z_notes,
            mode: value.mode.map(Into::into),
            preflight: value.preflight.unwrap_or(false),
            fuzzy_window: value.fuzzy_window,
        }
    }
}

/// A proposed change set. The `mode` tag selects which payload field is
/// read.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub(crate) enum CandidateParam {
    Diff { files: Vec<DiffEntryParam> },
    Patch { patch: String },
    Files { files: Vec<FileEntryParam> },
    Create { files: Vec<FileEntryParam> },
    Modify { files: Vec<ModifyEntryParam> },
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct DiffEntryParam {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct FileEntryParam {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct ModifyEntryParam {
    pub file: String,
    pub edits: Vec<EditOperationParam>,
}

/// One semantic edit. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "camelCase")]
pub(crate) enum EditOperationParam {
    #[serde(rename_all = "camelCase")]
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
    #[serde(rename_all = "camelCase")]
    ReplaceRange {
        start_line: usize,
        end_line: usize,
        content: String,
    },
    DeleteLine {
        line: usize,
    },
    #[serde(rename_all = "camelCase")]
    DeleteRange {
        start_line: usize,
        end_line: usize,
    },
}

impl From<EditOperationParam> for EditOperation {
    fn from(value: EditOperationParam) -> Self {
        match value {
            EditOperationParam::Replace {
                old_text,
                new_text,
                all,
            } => EditOperation::Replace {
                old_text,
                new_text,
                all,
            },
            EditOperationParam::InsertBefore { line, content } => {
                EditOperation::InsertBefore { line, content }
            }
            EditOperationParam::InsertAfter { line, content } => {
                EditOperation::InsertAfter { line, content }
            }
            EditOperationParam::ReplaceLine { line, content } => {
                EditOperation::ReplaceLine { line, content }
            }
            EditOperationParam::ReplaceRange {
                start_line,
                end_line,
                content,
            } => EditOperation::ReplaceRange {
                start_line,
                end_line,
                content,
            },
            EditOperationParam::DeleteLine { line } => EditOperation::DeleteLine { line },
            EditOperationParam::DeleteRange {
                start_line,
                end_line,
            } => EditOperation::DeleteRange {
                start_line,
                end_line,
            },
        }
    }
}

impl From<CandidateParam> for Candidate {
    fn from(value: CandidateParam) -> Self {
        match value {
            CandidateParam::Diff { files } => Candidate::Diff {
                files: files
                    .into_iter()
                    .map(|f| DiffSpec {
                        path: f.path,
                        diff: f.diff,
                    })
                    .collect(),
            },
            CandidateParam::Patch { patch } => Candidate::Patch { patch },
            CandidateParam::Files { files } => Candidate::Files {
                files: files
                    .into_iter()
                    .map(|f| FileSpec {
                        path: f.path,
                        content: f.content,
                    })
                    .collect(),
            },
            CandidateParam::Create { files } => Candidate::Create {
                files: files
                    .into_iter()
                    .map(|f| FileSpec {
                        path: f.path,
                        content: f.content,
                    })
                    .collect(),
            },
            CandidateParam::Modify { files } => Candidate::Modify {
                files: files
                    .into_iter()
                    .map(|f| ModifySpec {
                        file: f.file,
                        edits: f.edits.into_iter().map(Into::into).collect(),
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitCandidateToolParam {
    pub session_id: String,
    pub candidate: CandidateParam,
    /// Rationale notes for this step, truncated past 4000 characters.
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ValidateCandidateToolParam {
    pub session_id: String,
    pub candidate: CandidateParam,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetFileContentToolParam {
    pub session_id: String,
    /// Repository-relative paths, at most 50 per call.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetFileLinesToolParam {
    pub session_id: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionOnlyToolParam {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SaveCheckpointToolParam {
    pub session_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RestoreCheckpointToolParam {
    pub session_id: String,
    pub checkpoint_id: String,
}

fn create_tool<T: JsonSchema>(name: &str, description: &str) -> Tool {
    let schema = SchemaSettings::draft2019_09()
        .with(|s| {
            s.inline_subschemas = true;
            s.option_add_null_type = false
        })
        .into_generator()
        .into_root_schema_for::<T>();
    #[expect(clippy::expect_used)]
    let schema_value = serde_json::to_value(&schema).expect("tool schema serializes to JSON");
    #[expect(clippy::expect_used)]
    let input_schema = serde_json::from_value::<ToolInputSchema>(schema_value)
        .expect("tool schema has an object root");
    Tool {
        name: name.to_string(),
        input_schema,
        description: Some(description.to_string()),
        annotations: None,
    }
}

/// Every tool this server advertises, in a stable order.
pub(crate) fn all_tools() -> Vec<Tool> {
    vec![
        create_tool::<StartSessionToolParam>(
            "start_session",
            "Start a refinement session on a repository with build/test/lint/bench commands, \
             scoring weights, and a halting policy. Returns the session id.",
        ),
        create_tool::<SubmitCandidateToolParam>(
            "submit_candidate",
            "Apply a candidate change set (diff, patch, files, create, or modify mode), run \
             the configured commands, and return the scored evaluation with feedback and the \
             halting decision.",
        ),
        create_tool::<ValidateCandidateToolParam>(
            "validate_candidate",
            "Run the same checks as submit_candidate without writing anything; returns \
             errors, warnings, and a change preview.",
        ),
        create_tool::<GetFileContentToolParam>(
            "get_file_content",
            "Read files from the session repository (at most 50 per call) and refresh the \
             session's context for them.",
        ),
        create_tool::<GetFileLinesToolParam>(
            "get_file_lines",
            "Read an inclusive 1-based line range of one file, formatted with line numbers.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "get_state",
            "Return the session's current scores, step, halting config, and command status.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "should_halt",
            "Evaluate the halting policy against the current session state.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "get_suggestions",
            "Return the latest evaluation's feedback and halting reasons.",
        ),
        create_tool::<SaveCheckpointToolParam>(
            "save_checkpoint",
            "Record the session's scalar state (and file contents in snapshot mode) under a \
             fresh checkpoint id.",
        ),
        create_tool::<RestoreCheckpointToolParam>(
            "restore_checkpoint",
            "Restore a checkpoint's scalar state; file contents are restored only for \
             sessions in snapshot mode.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "list_checkpoints",
            "List saved checkpoints, oldest first.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "reset_to_baseline",
            "Hard-reset the repository to the revision captured at session start and zero \
             the refinement state.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "undo_last_candidate",
            "Revert the most recent submission's file changes and roll the session state \
             back one step.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "suggest_fix",
            "Analyze the most recent failure: likely culprit iteration, cascading-failure \
             flags, and top diagnostics. Runs nothing.",
        ),
        create_tool::<SessionOnlyToolParam>(
            "end_session",
            "Discard the session. In-flight work finishes; the id stops resolving.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn advertises_all_fifteen_tools() {
        let tools = all_tools();
        assert_eq!(tools.len(), 15);
        assert_eq!(tools[0].name, "start_session");
        assert!(tools.iter().all(|t| t.input_schema.r#type == "object"));
    }

    #[test]
    fn candidate_param_converts_to_engine_candidate() {
        let param: CandidateParam = serde_json::from_str(
            r#"{"mode":"modify","files":[{"file":"a.ts","edits":[{"op":"replace","oldText":"x","newText":"y","all":true}]}]}"#,
        )
        .expect("deserializes");
        let candidate: Candidate = param.into();
        match candidate {
            Candidate::Modify { files } => {
                assert_eq!(files[0].file, "a.ts");
                assert_eq!(
                    files[0].edits[0],
                    EditOperation::Replace {
                        old_text: "x".into(),
                        new_text: "y".into(),
                        all: true
                    }
                );
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn start_params_fill_defaults() {
        let param: StartSessionToolParam =
            serde_json::from_str(r#"{"repoPath":"/tmp/repo"}"#).expect("deserializes");
        let start: StartParams = param.into();
        assert_eq!(start.timeout_sec, 120);
        assert_eq!(start.ema_alpha, 0.9);
        assert_eq!(start.weights, Weights::default());
        assert_eq!(start.halt, HaltConfig::default());
    }
}
