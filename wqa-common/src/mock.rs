//! Scripted doubles for the runner, cloud and status seams.
//!
//! None of these touch the network or spawn processes. They record what
//! they were asked to do so tests can assert call counts and arguments.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::cloud::{CloudClient, function_app_name};
use crate::errors::{HarnessError, HarnessResult};
use crate::runner::{CommandRunner, ExecutionResult, Invocation};
use crate::status::{ClusterStatusSnapshot, DriveCounts, ProtectionScheme, StatusSource, StatusTarget};

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clusterized snapshot with the default 3+2 layout and one hot spare.
pub fn snapshot(clusterized: bool, total: u32, active: u32) -> ClusterStatusSnapshot {
    ClusterStatusSnapshot::new(
        clusterized,
        Some(DriveCounts { total, active }),
        Some(ProtectionScheme::new(3, 2, 1)),
    )
}

/// What the status function says before clusterization.
pub fn pending() -> ClusterStatusSnapshot {
    ClusterStatusSnapshot::new(false, None, None)
}

/// Status source replaying a fixed script; the last entry repeats forever.
#[derive(Debug, Default)]
pub struct ScriptedStatus {
    script: Vec<Result<ClusterStatusSnapshot, String>>,
    calls: AtomicUsize,
}

impl ScriptedStatus {
    pub fn new(snapshots: Vec<ClusterStatusSnapshot>) -> Self {
        Self {
            script: snapshots.into_iter().map(Ok).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn repeating(snapshot: ClusterStatusSnapshot) -> Self {
        Self::new(vec![snapshot])
    }

    /// Append a query failure after the scripted snapshots.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.script.push(Err(reason.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedStatus {
    async fn get_status(&self, target: StatusTarget<'_>) -> HarnessResult<ClusterStatusSnapshot> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let url = format!("mock://{}-{}/api/status", target.prefix, target.cluster_name);
        let Some(last) = self.script.len().checked_sub(1) else {
            return Err(HarnessError::status_query(url, "empty status script"));
        };
        match &self.script[n.min(last)] {
            Ok(snapshot) => Ok(snapshot.clone()),
            Err(reason) => Err(HarnessError::status_query(url, reason.clone())),
        }
    }
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    pattern: String,
    exit_code: i32,
    stderr: Vec<String>,
}

/// Command runner that records invocations instead of running them.
///
/// Every command succeeds with empty output unless a [`fail_on`] or
/// [`with_stdout`] rule matches a substring of it.
///
/// [`fail_on`]: RecordingRunner::fail_on
/// [`with_stdout`]: RecordingRunner::with_stdout
#[derive(Debug, Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Invocation>>,
    failures: Vec<ScriptedFailure>,
    outputs: Vec<(String, Vec<String>)>,
    raise_on_failure: bool,
    closes: AtomicUsize,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            raise_on_failure: true,
            ..Default::default()
        }
    }

    /// Like a remote runner: non-zero exits are returned, not raised.
    pub fn remote() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, pattern: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        self.failures.push(ScriptedFailure {
            pattern: pattern.into(),
            exit_code,
            stderr: vec![stderr.into()],
        });
        self
    }

    pub fn with_stdout<I, S>(mut self, pattern: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs
            .push((pattern.into(), lines.into_iter().map(Into::into).collect()));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        locked(&self.invocations).clone()
    }

    pub fn commands(&self) -> Vec<String> {
        locked(&self.invocations)
            .iter()
            .map(|i| i.command.clone())
            .collect()
    }

    /// Number of [`CommandRunner::close`] calls seen.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        locked(&self.invocations)
            .iter()
            .filter(|i| i.command.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> HarnessResult<ExecutionResult> {
        locked(&self.invocations).push(invocation.clone());
        let command = invocation.command.clone();
        let stdout = self
            .outputs
            .iter()
            .find(|(p, _)| command.contains(p.as_str()))
            .map(|(_, lines)| lines.clone())
            .unwrap_or_default();
        let failure = self
            .failures
            .iter()
            .find(|f| command.contains(f.pattern.as_str()));

        match failure {
            Some(f) if self.raise_on_failure => Err(HarnessError::CommandFailure {
                command,
                exit_code: f.exit_code,
                stderr_tail: f.stderr.clone(),
            }),
            Some(f) => Ok(ExecutionResult {
                command,
                exit_code: f.exit_code,
                stdout,
                stderr: f.stderr.clone(),
                duration: Duration::ZERO,
            }),
            None => Ok(ExecutionResult {
                command,
                exit_code: 0,
                stdout,
                stderr: Vec::new(),
                duration: Duration::ZERO,
            }),
        }
    }

    async fn close(&self) -> HarnessResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Cloud client that records calls as `"<operation> <args>"` strings.
#[derive(Debug)]
pub struct FakeCloud {
    calls: Mutex<Vec<String>>,
    key: Option<String>,
    fail_create: Option<String>,
    fail_delete: Option<String>,
    fail_reboot: Option<String>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            key: Some("fake-function-key".to_string()),
            fail_create: None,
            fail_delete: None,
            fail_reboot: None,
        }
    }

    pub fn without_key(mut self) -> Self {
        self.key = None;
        self
    }

    pub fn fail_create(mut self, reason: impl Into<String>) -> Self {
        self.fail_create = Some(reason.into());
        self
    }

    pub fn fail_delete(mut self, reason: impl Into<String>) -> Self {
        self.fail_delete = Some(reason.into());
        self
    }

    pub fn fail_reboot(mut self, reason: impl Into<String>) -> Self {
        self.fail_reboot = Some(reason.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    /// Number of recorded calls to `operation`.
    pub fn count(&self, operation: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    fn record(&self, call: String) {
        locked(&self.calls).push(call);
    }

    fn outcome(operation: &'static str, failure: &Option<String>) -> HarnessResult<()> {
        match failure {
            Some(reason) => Err(HarnessError::provisioning(operation, reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn create_resource_group(&self, name: &str, location: &str) -> HarnessResult<()> {
        self.record(format!("create_resource_group {name} {location}"));
        Self::outcome("create resource group", &self.fail_create)
    }

    async fn delete_resource_group(&self, name: &str) -> HarnessResult<()> {
        self.record(format!("delete_resource_group {name}"));
        Self::outcome("delete resource group", &self.fail_delete)
    }

    async fn get_access_key(&self, resource_group: &str, prefix: &str, cluster_name: &str) -> HarnessResult<String> {
        self.record(format!("get_access_key {resource_group}"));
        self.key.clone().ok_or_else(|| HarnessError::KeyNotFound {
            function_app: function_app_name(prefix, cluster_name),
        })
    }

    async fn reboot_node(
        &self,
        resource_group: &str,
        _prefix: &str,
        _cluster_name: &str,
        node_index: u32,
    ) -> HarnessResult<()> {
        self.record(format!("reboot_node {resource_group} {node_index}"));
        Self::outcome("reboot node", &self.fail_reboot)
    }
}
