//! Command execution, local and remote.
//!
//! Both runners stream stdout and stderr line by line as the process
//! produces them: stdout lines are logged at `info`, stderr lines at
//! `error`, and every line is retained in order on the
//! [`ExecutionResult`] so callers can parse it afterwards (terraform
//! outputs, `weka status`). Nothing here retries.

mod local;
#[cfg(unix)]
mod ssh;

pub use local::LocalRunner;
#[cfg(unix)]
pub use ssh::{SshRunner, SshSettings};

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::Span;

use crate::errors::HarnessResult;

/// A shell command line plus where and with what extra environment to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Extra environment; values are never logged.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Working directory; the runner's own when unset.
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Captured output of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Most recent stdout line satisfying `pred`.
    pub fn last_stdout_matching<F>(&self, pred: F) -> Option<&str>
    where
        F: Fn(&str) -> bool,
    {
        self.stdout
            .iter()
            .rev()
            .map(String::as_str)
            .find(|line| pred(line))
    }

    pub(crate) fn stderr_tail(&self, n: usize) -> Vec<String> {
        let start = self.stderr.len().saturating_sub(n);
        self.stderr[start..].to_vec()
    }
}

/// Executes shell command lines locally or on a remote host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion, streaming its output.
    async fn run(&self, invocation: &Invocation) -> HarnessResult<ExecutionResult>;

    /// Release any held connection. Runners without one have nothing to do.
    async fn close(&self) -> HarnessResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

/// Read `reader` to EOF one line at a time, logging each line as it arrives.
pub(crate) async fn drain_lines<R>(
    reader: Option<R>,
    stream: OutputStream,
    span: &Span,
) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    let mut lines = BufReader::new(reader).lines();
    let mut captured = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end().to_string();
        match stream {
            OutputStream::Stdout => tracing::info!(parent: span, "{line}"),
            OutputStream::Stderr => tracing::error!(parent: span, "{line}"),
        }
        captured.push(line);
    }
    Ok(captured)
}
