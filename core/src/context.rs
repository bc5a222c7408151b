//! Tracks which files a session has modified and which of those the
//! generator has re-read since. A submission that targets a file modified
//! in an earlier step, with no intervening content read, draws a stale-
//! context warning: the generator is editing text it has not seen.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;

use crate::fs::Fs;

#[derive(Debug, Default)]
pub struct ContextTracker {
    /// Step at which each path was last modified by a submission.
    modified_at: BTreeMap<String, u32>,
    /// Paths whose current content the generator has read since their last
    /// modification.
    fresh_reads: BTreeSet<String>,
    /// Last content the engine observed per path (post-read or post-apply).
    snapshots: HashMap<String, String>,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings for targets modified in a prior step and not re-read since.
    pub fn stale_warnings(&self, targets: &[String]) -> Vec<String> {
        targets
            .iter()
            .filter_map(|path| {
                let step = self.modified_at.get(path)?;
                if self.fresh_reads.contains(path) {
                    return None;
                }
                Some(format!(
                    "stale context: {path} was modified at step {step} but has not been \
                     re-read; fetch it with getFileContent before editing further"
                ))
            })
            .collect()
    }

    /// Record an applied submission: marks paths modified at `step`,
    /// invalidates their read freshness, and refreshes the last-observed
    /// snapshot from disk (dropping entries for files that no longer
    /// exist).
    pub fn note_applied(&mut self, paths: &[(String, std::path::PathBuf)], step: u32, fs: &dyn Fs) {
        for (rel, abs) in paths {
            self.modified_at.insert(rel.clone(), step);
            self.fresh_reads.remove(rel);
            self.refresh_snapshot(rel, abs, fs);
        }
    }

    /// Record a successful content read.
    pub fn note_read(&mut self, path: &str, content: &str) {
        self.fresh_reads.insert(path.to_string());
        self.snapshots.insert(path.to_string(), content.to_string());
    }

    /// Re-observe a path after an undo or checkpoint restore rewrote it.
    pub fn refresh_snapshot(&mut self, rel: &str, abs: &Path, fs: &dyn Fs) {
        match fs.read(abs) {
            Ok(content) => {
                self.snapshots.insert(rel.to_string(), content);
            }
            Err(_) => {
                self.snapshots.remove(rel);
            }
        }
    }

    pub fn modified_files(&self) -> impl Iterator<Item = &str> {
        self.modified_at.keys().map(String::as_str)
    }

    pub fn last_snapshot(&self, path: &str) -> Option<&str> {
        self.snapshots.get(path).map(String::as_str)
    }

    /// Drop the modification record for paths whose last modification was
    /// undone. The caller re-marks them from the remaining iteration
    /// contexts so an earlier touch stays authoritative.
    pub fn forget_modified(&mut self, paths: &[String]) {
        for path in paths {
            self.modified_at.remove(path);
        }
    }

    /// Re-mark a path as modified at `step`, keeping the latest step when
    /// several iterations touched it.
    pub fn mark_modified(&mut self, path: &str, step: u32) {
        let entry = self.modified_at.entry(path.to_string()).or_insert(step);
        if *entry < step {
            *entry = step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use pretty_assertions::assert_eq;

    fn target(path: &str) -> (String, std::path::PathBuf) {
        (path.to_string(), std::path::PathBuf::from(format!("/repo/{path}")))
    }

    #[test]
    fn warns_on_modified_but_unread_target() {
        let fs = MemFs::with_files(&[("/repo/f.ts", "v2")]);
        let mut tracker = ContextTracker::new();
        tracker.note_applied(&[target("f.ts")], 1, &fs);

        let warnings = tracker.stale_warnings(&["f.ts".to_string()]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("f.ts"));
        assert!(warnings[0].contains("step 1"));
    }

    #[test]
    fn a_read_clears_the_warning() {
        let fs = MemFs::with_files(&[("/repo/f.ts", "v2")]);
        let mut tracker = ContextTracker::new();
        tracker.note_applied(&[target("f.ts")], 1, &fs);
        tracker.note_read("f.ts", "v2");

        assert!(tracker.stale_warnings(&["f.ts".to_string()]).is_empty());
    }

    #[test]
    fn a_later_apply_invalidates_the_read() {
        let fs = MemFs::with_files(&[("/repo/f.ts", "v3")]);
        let mut tracker = ContextTracker::new();
        tracker.note_applied(&[target("f.ts")], 1, &fs);
        tracker.note_read("f.ts", "v2");
        tracker.note_applied(&[target("f.ts")], 2, &fs);

        let warnings = tracker.stale_warnings(&["f.ts".to_string()]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("step 2"));
    }

    #[test]
    fn untouched_targets_do_not_warn() {
        let tracker = ContextTracker::new();
        assert!(tracker.stale_warnings(&["new.ts".to_string()]).is_empty());
    }

    #[test]
    fn snapshots_follow_the_disk() {
        let fs = MemFs::with_files(&[("/repo/f.ts", "on disk")]);
        let mut tracker = ContextTracker::new();
        tracker.note_applied(&[target("f.ts")], 1, &fs);
        assert_eq!(tracker.last_snapshot("f.ts"), Some("on disk"));

        fs.remove(Path::new("/repo/f.ts")).expect("remove");
        tracker.refresh_snapshot("f.ts", Path::new("/repo/f.ts"), &fs);
        assert_eq!(tracker.last_snapshot("f.ts"), None);
    }
}
