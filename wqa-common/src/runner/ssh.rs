use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{Span, debug, info, info_span, warn};

use super::{CommandRunner, ExecutionResult, Invocation, OutputStream, drain_lines};
use crate::errors::{HarnessError, HarnessResult};
use crate::util::mask_secrets;

/// How to authenticate against a cluster backend.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub user: String,
    pub key_path: PathBuf,
    pub connect_timeout: Duration,
}

impl SshSettings {
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs commands on a remote host over one held SSH session.
///
/// The session is opened on the first command and reused afterwards. A
/// non-zero remote exit status is reported in the result, not raised.
pub struct SshRunner {
    host: String,
    settings: SshSettings,
    session: Mutex<Option<Session>>,
    span: Span,
}

impl SshRunner {
    pub fn new(host: impl Into<String>, settings: SshSettings) -> Self {
        let host = host.into();
        let span = info_span!("runner", kind = "ssh", host = %host);
        Self {
            host,
            settings,
            session: Mutex::new(None),
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn connect(&self) -> HarnessResult<Session> {
        debug!(
            parent: &self.span,
            user = %self.settings.user,
            key = %self.settings.key_path.display(),
            "opening ssh session"
        );
        let mut builder = SessionBuilder::default();
        builder
            .user(self.settings.user.clone())
            .keyfile(&self.settings.key_path)
            .known_hosts_check(KnownHosts::Add)
            .connect_timeout(self.settings.connect_timeout);
        let session = builder
            .connect(&self.host)
            .await
            .map_err(|e| self.connection_failure(e))?;
        info!(parent: &self.span, "ssh session established");
        Ok(session)
    }

    fn connection_failure(&self, err: openssh::Error) -> HarnessError {
        HarnessError::ConnectionFailure {
            host: self.host.clone(),
            reason: err.to_string(),
        }
    }

}

fn remote_command_line(invocation: &Invocation) -> String {
    let mut line = String::new();
    for (key, value) in &invocation.env {
        line.push_str(&format!(
            "export {key}={}; ",
            shell_escape::unix::escape(value.into())
        ));
    }
    if let Some(dir) = &invocation.cwd {
        let dir = dir.to_string_lossy();
        line.push_str(&format!("cd {} && ", shell_escape::unix::escape(dir)));
    }
    line.push_str(&invocation.command);
    line
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, invocation: &Invocation) -> HarnessResult<ExecutionResult> {
        let masked = mask_secrets(&invocation.command, &[]);
        let start = Instant::now();

        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let session = guard.as_ref().ok_or_else(|| HarnessError::ConnectionFailure {
            host: self.host.clone(),
            reason: "ssh session unavailable".to_string(),
        })?;

        debug!(parent: &self.span, command = %masked, "executing remotely");
        let mut child = session
            .raw_command(remote_command_line(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| self.connection_failure(e))?;

        let stdout = child.stdout().take();
        let stderr = child.stderr().take();
        let (stdout, stderr) = tokio::join!(
            drain_lines(stdout, OutputStream::Stdout, &self.span),
            drain_lines(stderr, OutputStream::Stderr, &self.span),
        );
        let status = child.wait().await.map_err(|e| self.connection_failure(e))?;

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
                "remote command exited non-zero"
            );
        }
        Ok(result)
    }

    async fn close(&self) -> HarnessResult<()> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session.close().await.map_err(|e| self.connection_failure(e))?;
        debug!(parent: &self.span, "ssh session closed");
        Ok(())
    }
}
