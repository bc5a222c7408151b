//! Subprocess execution for evaluation commands. Commands are tokenized
//! with POSIX quoting rules and spawned argv-style with no shell, so there
//! is no expansion, substitution, or globbing. Each run has an independent
//! wall-clock deadline; a timed-out command is killed and reported
//! distinctly rather than surfaced as an error.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::EngineError;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Result used for unconfigured or unavailable commands.
    pub fn synthetic_success() -> Self {
        Self {
            ok: true,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        }
    }
}

/// Split a command string into argv, honoring single and double quotes.
/// An unterminated quote is a hard error; there is no shell downstream to
/// guess at what was meant.
pub fn tokenize(command: &str) -> Result<Vec<String>> {
    match shlex::split(command) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        Some(_) => Err(EngineError::InvalidParameter {
            name: "command".to_string(),
            reason: "command is empty after tokenization".to_string(),
        }),
        None => Err(EngineError::InvalidParameter {
            name: "command".to_string(),
            reason: format!("unterminated quote in command: {command:?}"),
        }),
    }
}

/// Runs evaluation commands. The `Scripted` variant backs tests with
/// canned outputs so engine behavior is deterministic without spawning
/// processes.
#[derive(Debug)]
pub enum CommandRunner {
    Process,
    Scripted(ScriptedRunner),
}

impl CommandRunner {
    pub async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> CommandOutput {
        match self {
            CommandRunner::Process => run_process(command, cwd, timeout).await,
            CommandRunner::Scripted(scripted) => scripted.run(command),
        }
    }
}

async fn run_process(command: &str, cwd: &Path, timeout: Duration) -> CommandOutput {
    let argv = match tokenize(command) {
        Ok(argv) => argv,
        Err(e) => {
            return CommandOutput {
                ok: false,
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to tokenize command: {e}"),
                timed_out: false,
            };
        }
    };

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(cwd)
        // No stdin: some tools block forever probing an open descriptor.
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandOutput {
                ok: false,
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to spawn {:?}: {e}", argv[0]),
                timed_out: false,
            };
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            CommandOutput {
                ok: output.status.success(),
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            }
        }
        Ok(Err(e)) => CommandOutput {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("failed waiting for command: {e}"),
            timed_out: false,
        },
        // Dropping the in-flight future tears the child down via
        // kill_on_drop, taking its process group with it.
        Err(_) => CommandOutput {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("Command timed out after {}s", timeout.as_secs()),
            timed_out: true,
        },
    }
}

/// Canned command results keyed by the exact command string. Unknown
/// commands fail loudly so a test cannot silently pass on a missing entry.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outputs: HashMap<String, CommandOutput>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, command: &str, output: CommandOutput) -> Self {
        self.outputs.insert(command.to_string(), output);
        self
    }

    pub fn on_success(self, command: &str, stdout: &str) -> Self {
        self.on(
            command,
            CommandOutput {
                ok: true,
                exit_code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
                timed_out: false,
            },
        )
    }

    pub fn on_failure(self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.on(
            command,
            CommandOutput {
                ok: false,
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
                timed_out: false,
            },
        )
    }

    fn run(&self, command: &str) -> CommandOutput {
        self.outputs.get(command).cloned().unwrap_or(CommandOutput {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("scripted runner has no entry for {command:?}"),
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tokenize_respects_quotes() {
        assert_eq!(
            tokenize(r#"cargo test --message-format "json with spaces""#).expect("tokenizes"),
            vec!["cargo", "test", "--message-format", "json with spaces"]
        );
        assert_eq!(
            tokenize("npm run 'my script'").expect("tokenizes"),
            vec!["npm", "run", "my script"]
        );
    }

    #[test]
    fn tokenize_rejects_unterminated_quote() {
        let err = tokenize("echo 'oops").expect_err("must fail");
        assert_eq!(err.code(), "InvalidParameter");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_a_real_command() {
        let runner = CommandRunner::Process;
        let out = runner
            .run("echo hello", Path::new("."), Duration::from_secs(10))
            .await;
        assert!(out.ok);
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_not_ok() {
        let runner = CommandRunner::Process;
        let out = runner
            .run("false", Path::new("."), Duration::from_secs(10))
            .await;
        assert!(!out.ok);
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_is_reported_distinctly() {
        let runner = CommandRunner::Process;
        let out = runner
            .run("sleep 5", Path::new("."), Duration::from_secs(1))
            .await;
        assert!(!out.ok);
        assert_eq!(out.exit_code, -1);
        assert!(out.timed_out);
        assert!(out.stderr.starts_with("Command timed out after 1s"));
    }

    #[tokio::test]
    async fn spawn_failure_is_captured_not_raised() {
        let runner = CommandRunner::Process;
        let out = runner
            .run(
                "definitely-not-a-real-binary-anneal",
                Path::new("."),
                Duration::from_secs(5),
            )
            .await;
        assert!(!out.ok);
        assert!(out.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn scripted_runner_replays_entries() {
        let runner = CommandRunner::Scripted(
            ScriptedRunner::new().on_success("make build", "done"),
        );
        let out = runner
            .run("make build", Path::new("."), Duration::from_secs(1))
            .await;
        assert!(out.ok);
        assert_eq!(out.stdout, "done");

        let out = runner
            .run("make other", Path::new("."), Duration::from_secs(1))
            .await;
        assert!(!out.ok);
    }
}
