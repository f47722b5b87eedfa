//! Bounded execution of engine CLI commands

use crate::{Error, Result};
use async_process::{Command, Stdio};
use async_runtime_compat::runtime_utils::timeout;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::debug;

/// Captured result of one CLI invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The most useful failure text: stderr, falling back to stdout
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs an engine binary with a deadline on every call
#[derive(Debug, Clone)]
pub struct CommandRunner {
    binary: String,
}

impl CommandRunner {
    /// Create a runner for `binary` (looked up on `PATH`)
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The binary this runner invokes
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run the binary with `args`, killing it if `deadline` passes.
    ///
    /// A non-zero exit is not an error here; callers classify the output.
    pub async fn run(
        &self,
        operation: &'static str,
        args: &[String],
        deadline: Duration,
    ) -> Result<CommandOutput> {
        debug!("{} {}: {}", operation, self.binary, args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(deadline, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::Unavailable(format!(
                    "{} binary not found on PATH",
                    self.binary
                )));
            }
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => {
                return Err(Error::Timeout {
                    operation,
                    after: deadline,
                });
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[smol_potat::test]
    async fn test_run_captures_output() {
        let runner = CommandRunner::new("sh");
        let output = runner
            .run("echo", &args(&["-c", "echo out; echo err >&2"]), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.failure_message(), "err");
    }

    #[smol_potat::test]
    async fn test_missing_binary_is_unavailable() {
        let runner = CommandRunner::new("definitely-not-a-container-engine");
        let err = runner
            .run("ping", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[smol_potat::test]
    async fn test_deadline_kills_command() {
        let runner = CommandRunner::new("sleep");
        let err = runner
            .run("sleep", &args(&["5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
