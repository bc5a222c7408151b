//! Baseline capture and reset via command-line git. Everything here is
//! best-effort with a short timeout: a repository without git simply has no
//! baseline capability, which the session reports rather than fails on.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::EngineError;
use crate::error::Result;
use crate::limits::PREFLIGHT_TIMEOUT_SECS;

fn git_timeout() -> Duration {
    Duration::from_secs(PREFLIGHT_TIMEOUT_SECS)
}

async fn run_git(args: &[&str], cwd: &Path) -> Option<std::process::Output> {
    let result = timeout(
        git_timeout(),
        Command::new("git").args(args).current_dir(cwd).output(),
    )
    .await;
    match result {
        Ok(Ok(output)) => Some(output),
        _ => None,
    }
}

/// Capture the current HEAD commit id, or `None` when the directory is not
/// a git repository (or git is missing or slow).
pub async fn capture_baseline(repo: &Path) -> Option<String> {
    let output = run_git(&["rev-parse", "HEAD"], repo).await?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?;
    let commit = commit.trim();
    if commit.is_empty() {
        None
    } else {
        Some(commit.to_string())
    }
}

/// Verify the commit still exists, then hard-reset the working tree to it.
pub async fn reset_to_commit(repo: &Path, commit: &str) -> Result<()> {
    let verified = run_git(&["rev-parse", "--verify", &format!("{commit}^{{commit}}")], repo)
        .await
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !verified {
        return Err(EngineError::Validation(format!(
            "baseline commit {commit} no longer resolves in this repository"
        )));
    }

    let output = run_git(&["reset", "--hard", commit], repo).await.ok_or_else(|| {
        EngineError::Validation("git reset did not complete within the time budget".to_string())
    })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "git reset --hard failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
