//! Candidate submissions: the five ways a generator may propose changes.
//! A closed sum keeps dispatch exhaustive; the applier in the engine turns
//! a candidate into per-path content changes before anything is written.

use serde::Deserialize;
use serde::Serialize;

use anneal_patch::EditOperation;

/// A proposed set of file changes for one refinement step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Candidate {
    /// Per-file unified diffs, fuzzily applied.
    Diff { files: Vec<DiffSpec> },
    /// One unified diff text possibly covering several files.
    Patch { patch: String },
    /// Full-content overwrites (creating files as needed).
    Files { files: Vec<FileSpec> },
    /// Full-content writes that must not clobber existing files.
    Create { files: Vec<FileSpec> },
    /// Semantic edit operations against existing files.
    Modify { files: Vec<ModifySpec> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffSpec {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifySpec {
    pub file: String,
    pub edits: Vec<EditOperation>,
}

impl Candidate {
    pub fn mode_name(&self) -> &'static str {
        match self {
            Candidate::Diff { .. } => "diff",
            Candidate::Patch { .. } => "patch",
            Candidate::Files { .. } => "files",
            Candidate::Create { .. } => "create",
            Candidate::Modify { .. } => "modify",
        }
    }

    /// Paths this candidate names directly. For `patch` mode the paths are
    /// only known after parsing the diff, so this returns empty there and
    /// the applier supplies them.
    pub fn declared_paths(&self) -> Vec<String> {
        match self {
            Candidate::Diff { files } => files.iter().map(|f| f.path.clone()).collect(),
            Candidate::Patch { .. } => Vec::new(),
            Candidate::Files { files } | Candidate::Create { files } => {
                files.iter().map(|f| f.path.clone()).collect()
            }
            Candidate::Modify { files } => files.iter().map(|f| f.file.clone()).collect(),
        }
    }

    pub fn uses_patch_format(&self) -> bool {
        matches!(self, Candidate::Diff { .. } | Candidate::Patch { .. })
    }
}
