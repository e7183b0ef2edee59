use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{Span, debug, info_span, warn};

use super::{CommandRunner, ExecutionResult, Invocation, OutputStream, drain_lines};
use crate::errors::{HarnessError, HarnessResult};
use crate::util::mask_secrets;

const STDERR_TAIL_LINES: usize = 20;

/// Runs commands on this host through `sh -c`.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    span: Span,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self {
            span: info_span!("runner", kind = "local"),
        }
    }

    pub fn with_span(span: Span) -> Self {
        Self { span }
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, invocation: &Invocation) -> HarnessResult<ExecutionResult> {
        let masked = mask_secrets(&invocation.command, &[]);
        debug!(parent: &self.span, command = %masked, cwd = ?invocation.cwd, "executing");

        let start = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&invocation.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr) = tokio::join!(
            drain_lines(stdout, OutputStream::Stdout, &self.span),
            drain_lines(stderr, OutputStream::Stderr, &self.span),
        );
        let status = child.wait().await?;

        let result = ExecutionResult {
            command: masked,
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout?,
            stderr: stderr?,
            duration: start.elapsed(),
        };

        if !result.success() {
            warn!(
                parent: &self.span,
                command = %result.command,
                exit_code = result.exit_code,
                "command failed"
            );
            return Err(HarnessError::CommandFailure {
                exit_code: result.exit_code,
                stderr_tail: result.stderr_tail(STDERR_TAIL_LINES),
                command: result.command,
            });
        }

        debug!(
            parent: &self.span,
            command = %result.command,
            duration_ms = result.duration.as_millis() as u64,
            "command completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_both_streams_in_order() {
        let runner = LocalRunner::new();
        let result = runner
            .run(&Invocation::new("echo one; echo two; echo oops >&2"))
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, vec!["one", "two"]);
        assert_eq!(result.stderr, vec!["oops"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_command_failure() {
        let runner = LocalRunner::new();
        let err = runner
            .run(&Invocation::new("echo bad >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            HarnessError::CommandFailure {
                exit_code,
                stderr_tail,
                ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr_tail, vec!["bad"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn honours_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "present\n").unwrap();
        let runner = LocalRunner::new();
        let result = runner
            .run(
                &Invocation::new("cat marker.txt; echo \"$WQA_TEST_VALUE\"")
                    .in_dir(dir.path())
                    .with_env("WQA_TEST_VALUE", "from-env"),
            )
            .await
            .unwrap();
        assert_eq!(result.stdout, vec!["present", "from-env"]);
    }

    #[tokio::test]
    async fn missing_cwd_is_io_error() {
        let runner = LocalRunner::new();
        let err = runner
            .run(&Invocation::new("true").in_dir("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Io(_)));
    }
}
