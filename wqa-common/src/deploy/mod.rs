//! Deployment lifecycle: config generation, apply, convergence, cleanup.
//!
//! ```text
//! Initialized -> ConfigGenerated -> Applying -> WaitingForConvergence -> Ready
//!                                      |                 |
//!                                      +----> Failed <---+
//! any state ---------------------------------> Destroying -> Destroyed
//! ```
//!
//! A [`DeploymentController`] owns exactly one [`Deployment`]. Cleanup is a
//! sequence of independently guarded steps whose failures are logged and
//! collected in a [`CleanupReport`], never returned as errors.

pub mod naming;
pub mod params;
pub mod wait;

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{Span, debug, error, info, info_span, warn};

use crate::cloud::{CloudClient, CloudCredentials};
use crate::errors::{HarnessError, HarnessResult};
use crate::runner::{CommandRunner, ExecutionResult, Invocation};
use crate::status::{ClusterStatusSnapshot, StatusSource, StatusTarget};
use crate::util::mask_secrets;

pub use naming::DeploymentNames;
pub use params::{DeploymentParameters, render_main_tf};
pub use wait::{Evaluation, ExpectedState, WaitOutcome, WaitPolicy, wait_until};

pub const MAIN_TF: &str = "main.tf";

/// Lifecycle position of a [`Deployment`]; see the module diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Initialized,
    ConfigGenerated,
    Applying,
    WaitingForConvergence,
    Ready,
    Failed,
    Destroying,
    Destroyed,
}

impl DeploymentState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Destroying` is reachable from every live state and leads only to
    /// `Destroyed`, which is terminal. `Ready -> WaitingForConvergence`
    /// re-enters the wait after an injected fault.
    pub fn can_transition_to(self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (Destroying, Destroyed) => true,
            (Destroying, _) => false,
            (_, Destroying) => true,
            (Initialized, ConfigGenerated) => true,
            (ConfigGenerated, Applying) => true,
            (Applying, WaitingForConvergence | Failed) => true,
            (WaitingForConvergence, WaitingForConvergence | Ready | Failed) => true,
            (Ready, WaitingForConvergence) => true,
            _ => false,
        }
    }

    /// Snake-case name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::ConfigGenerated => "config_generated",
            Self::Applying => "applying",
            Self::WaitingForConvergence => "waiting_for_convergence",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poll cadence and budgets for the two kinds of waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingSettings {
    pub interval: Duration,
    pub convergence_timeout: Duration,
    pub fault_detection_timeout: Duration,
    pub fault_poll_interval: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            convergence_timeout: Duration::from_secs(1800),
            fault_detection_timeout: Duration::from_secs(600),
            fault_poll_interval: Duration::from_secs(10),
        }
    }
}

impl PollingSettings {
    /// Policy for waiting on a fresh or recovering cluster to converge.
    pub fn convergence(&self) -> WaitPolicy {
        WaitPolicy::new(self.interval, self.convergence_timeout)
    }

    /// Faster, shorter policy for noticing an injected fault.
    pub fn fault_detection(&self) -> WaitPolicy {
        WaitPolicy::new(self.fault_poll_interval, self.fault_detection_timeout)
    }
}

/// Everything a controller needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub work_root: PathBuf,
    pub terraform_binary: String,
    pub template: String,
    pub prefix: String,
    /// Applied over the built-in defaults, under per-deployment overrides.
    pub base_parameters: DeploymentParameters,
    pub credentials: CloudCredentials,
    pub get_weka_io_token: Option<String>,
    pub polling: PollingSettings,
    pub ssh_user: String,
    pub ssh_connect_timeout: Duration,
}

impl DeploymentSettings {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            terraform_binary: "terraform".to_string(),
            template: params::DEFAULT_TEMPLATE.to_string(),
            prefix: "weka".to_string(),
            base_parameters: DeploymentParameters::default(),
            credentials: CloudCredentials::default(),
            get_weka_io_token: None,
            polling: PollingSettings::default(),
            ssh_user: "weka".to_string(),
            ssh_connect_timeout: Duration::from_secs(30),
        }
    }

    fn secrets(&self) -> Vec<&str> {
        [
            self.credentials.client_secret.as_deref(),
            self.get_weka_io_token.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Parameters a deployment is rendered with: defaults, then configured
/// parameters, then caller overrides, then identity keys which always win.
pub fn effective_parameters(
    settings: &DeploymentSettings,
    names: &DeploymentNames,
    overrides: &DeploymentParameters,
) -> DeploymentParameters {
    let mut merged = DeploymentParameters::defaults()
        .merge(&settings.base_parameters)
        .merge(overrides);
    merged.set("prefix", json!(settings.prefix));
    merged.set("rg_name", json!(names.resource_group));
    merged.set("cluster_name", json!(names.cluster_name));
    if let Some(subscription) = &settings.credentials.subscription_id {
        merged.set("subscription_id", json!(subscription));
    }
    if let Some(token) = &settings.get_weka_io_token {
        merged.set("get_weka_io_token", json!(token));
    }
    merged
}

/// One cluster instance under test.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub names: DeploymentNames,
    pub prefix: String,
    pub parameters: DeploymentParameters,
    pub work_dir: PathBuf,
    state: DeploymentState,
    #[serde(skip)]
    access_key: Option<String>,
    #[serde(skip)]
    apply_output: Vec<String>,
}

impl Deployment {
    /// Current lifecycle state.
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Stdout lines of the last successful `terraform apply`, in order.
    /// Empty until [`DeploymentController::apply`] has finished.
    pub fn apply_output(&self) -> &[String] {
        &self.apply_output
    }
}

/// Outcome of one guarded cleanup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    fn from_result<T>(result: HarnessResult<T>) -> Self {
        match result {
            Ok(_) => Self::Done,
            Err(e) => Self::Failed(format!("[{}] {e}", e.code())),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub terraform_destroy: StepOutcome,
    pub delete_resource_group: StepOutcome,
    pub remove_work_dir: StepOutcome,
}

impl CleanupReport {
    fn already_destroyed() -> Self {
        let skipped = || StepOutcome::Skipped("already destroyed".to_string());
        Self {
            terraform_destroy: skipped(),
            delete_resource_group: skipped(),
            remove_work_dir: skipped(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &StepOutcome)> {
        self.steps().into_iter().filter(|(_, o)| o.is_failed())
    }

    pub fn steps(&self) -> [(&'static str, &StepOutcome); 3] {
        [
            ("terraform destroy", &self.terraform_destroy),
            ("delete resource group", &self.delete_resource_group),
            ("remove working directory", &self.remove_work_dir),
        ]
    }
}

impl std::fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, outcome)) in self.steps().into_iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}: {outcome}")?;
        }
        Ok(())
    }
}

/// External collaborators of a controller.
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub cloud: Arc<dyn CloudClient>,
    pub status: Arc<dyn StatusSource>,
}

pub struct DeploymentController {
    deployment: Deployment,
    settings: DeploymentSettings,
    overrides: DeploymentParameters,
    runner: Arc<dyn CommandRunner>,
    cloud: Arc<dyn CloudClient>,
    status: Arc<dyn StatusSource>,
    span: Span,
}

impl DeploymentController {
    /// New deployment for `worker_id` with fresh unique names.
    pub fn initialize(
        worker_id: &str,
        settings: DeploymentSettings,
        overrides: DeploymentParameters,
        collaborators: Collaborators,
    ) -> Self {
        let names = naming::generate(worker_id);
        let work_dir = settings.work_root.join(&names.id);
        let parameters = effective_parameters(&settings, &names, &overrides);
        let span = info_span!("deployment", deployment_id = %names.id);
        info!(
            parent: &span,
            resource_group = %names.resource_group,
            work_dir = %work_dir.display(),
            "deployment initialized"
        );
        Self::assemble(
            Deployment {
                names,
                prefix: settings.prefix.clone(),
                parameters,
                work_dir,
                state: DeploymentState::Initialized,
                access_key: None,
                apply_output: Vec::new(),
            },
            settings,
            overrides,
            collaborators,
            span,
        )
    }

    /// Take over a deployment left behind by an earlier run so it can be
    /// cleaned up. Its resources may exist but its health is unknown, so it
    /// starts in [`DeploymentState::Applying`].
    pub fn adopt(
        work_dir: impl Into<PathBuf>,
        resource_group: impl Into<String>,
        settings: DeploymentSettings,
        collaborators: Collaborators,
    ) -> Self {
        let work_dir = work_dir.into();
        let id = work_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let names = DeploymentNames {
            cluster_name: id.clone(),
            id,
            resource_group: resource_group.into(),
        };
        let span = info_span!("deployment", deployment_id = %names.id);
        let parameters = effective_parameters(&settings, &names, &DeploymentParameters::default());
        Self::assemble(
            Deployment {
                names,
                prefix: settings.prefix.clone(),
                parameters,
                work_dir,
                state: DeploymentState::Applying,
                access_key: None,
                apply_output: Vec::new(),
            },
            settings,
            DeploymentParameters::default(),
            collaborators,
            span,
        )
    }

    fn assemble(
        deployment: Deployment,
        settings: DeploymentSettings,
        overrides: DeploymentParameters,
        collaborators: Collaborators,
        span: Span,
    ) -> Self {
        Self {
            deployment,
            settings,
            overrides,
            runner: collaborators.runner,
            cloud: collaborators.cloud,
            status: collaborators.status,
            span,
        }
    }

    /// Replace the span every controller event is parented to.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Shorthand for `self.deployment().state()`.
    pub fn state(&self) -> DeploymentState {
        self.deployment.state
    }

    pub fn names(&self) -> &DeploymentNames {
        &self.deployment.names
    }

    pub fn settings(&self) -> &DeploymentSettings {
        &self.settings
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Cloud backend, for scenarios that act on provider resources.
    pub fn cloud(&self) -> &dyn CloudClient {
        self.cloud.as_ref()
    }

    pub fn status_source(&self) -> &dyn StatusSource {
        self.status.as_ref()
    }

    /// Lines captured from the last `terraform apply`.
    pub fn apply_output(&self) -> &[String] {
        &self.deployment.apply_output
    }

    fn check(&self, next: DeploymentState) -> HarnessResult<()> {
        let from = self.deployment.state;
        if from.can_transition_to(next) {
            Ok(())
        } else {
            Err(HarnessError::InvalidTransition { from, to: next })
        }
    }

    fn transition(&mut self, next: DeploymentState) -> HarnessResult<()> {
        self.check(next)?;
        let from = std::mem::replace(&mut self.deployment.state, next);
        if from != next {
            info!(parent: &self.span, %from, to = %next, "deployment state changed");
        }
        Ok(())
    }

    /// Render `main.tf` into the working directory.
    pub async fn generate_config(&mut self) -> HarnessResult<PathBuf> {
        self.check(DeploymentState::ConfigGenerated)?;
        let parameters = effective_parameters(&self.settings, &self.deployment.names, &self.overrides);
        parameters.validate()?;
        let rendered = render_main_tf(&self.settings.template, &parameters)?;
        let path = self.deployment.work_dir.join(MAIN_TF);
        tokio::fs::create_dir_all(&self.deployment.work_dir).await?;
        tokio::fs::write(&path, rendered).await?;
        debug!(parent: &self.span, path = %path.display(), parameters = parameters.len(), "terraform config written");
        self.deployment.parameters = parameters;
        self.transition(DeploymentState::ConfigGenerated)?;
        Ok(path)
    }

    fn terraform(&self, args: &str) -> Invocation {
        let binary = shell_escape::escape(Cow::from(self.settings.terraform_binary.as_str()));
        Invocation::new(format!("{binary} {args}"))
            .in_dir(&self.deployment.work_dir)
            .with_env("TF_IN_AUTOMATION", "1")
            .with_envs(self.settings.credentials.terraform_env())
    }

    async fn run_terraform(&self, args: &str) -> HarnessResult<ExecutionResult> {
        let invocation = self.terraform(args);
        info!(
            parent: &self.span,
            command = %mask_secrets(&invocation.command, &self.settings.secrets()),
            "running terraform"
        );
        self.runner.run(&invocation).await
    }

    /// Create the resource group and apply the rendered configuration.
    pub async fn apply(&mut self) -> HarnessResult<()> {
        self.transition(DeploymentState::Applying)?;
        let names = &self.deployment.names;
        self.cloud
            .create_resource_group(&names.resource_group, self.deployment.parameters.location())
            .await?;
        self.run_terraform("init -input=false").await?;
        let applied = self.run_terraform("apply -auto-approve -input=false").await?;
        info!(
            parent: &self.span,
            duration_s = applied.duration.as_secs(),
            lines = applied.stdout.len(),
            "terraform apply finished"
        );
        self.deployment.apply_output = applied.stdout;
        Ok(())
    }

    /// Status function key, fetched once and cached.
    pub async fn access_key(&mut self) -> HarnessResult<String> {
        if let Some(key) = &self.deployment.access_key {
            return Ok(key.clone());
        }
        let names = &self.deployment.names;
        let key = self
            .cloud
            .get_access_key(&names.resource_group, &self.deployment.prefix, &names.cluster_name)
            .await?;
        debug!(parent: &self.span, "status access key retrieved");
        self.deployment.access_key = Some(key.clone());
        Ok(key)
    }

    /// Poll until `expected` holds or `policy.budget` runs out.
    ///
    /// Timing out is returned as [`WaitOutcome::TimedOut`]; only status
    /// query failures are errors.
    pub async fn wait_for_cluster(
        &mut self,
        expected: &ExpectedState,
        policy: WaitPolicy,
    ) -> HarnessResult<WaitOutcome> {
        self.transition(DeploymentState::WaitingForConvergence)?;
        let key = self.access_key().await?;
        let deployment = &self.deployment;
        let target = StatusTarget {
            prefix: &deployment.prefix,
            cluster_name: &deployment.names.cluster_name,
            access_key: &key,
        };
        let outcome = wait_until(self.status.as_ref(), target, expected, policy, &self.span).await?;
        if outcome.is_converged() {
            self.transition(DeploymentState::Ready)?;
        }
        Ok(outcome)
    }

    /// Generate (if needed), apply and wait for `expected`.
    ///
    /// Any failure, including a timed-out wait, moves the deployment to
    /// `Failed`, runs the full cleanup and returns the original error.
    pub async fn provision(&mut self, expected: &ExpectedState) -> HarnessResult<ClusterStatusSnapshot> {
        match self.try_provision(expected).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                error!(parent: &self.span, code = err.code(), error = %err, "provisioning failed, cleaning up");
                if self.deployment.state.can_transition_to(DeploymentState::Failed) {
                    self.deployment.state = DeploymentState::Failed;
                }
                let report = self.cleanup().await;
                if !report.is_clean() {
                    warn!(parent: &self.span, %report, "cleanup after failed provisioning was incomplete");
                }
                Err(err)
            }
        }
    }

    async fn try_provision(&mut self, expected: &ExpectedState) -> HarnessResult<ClusterStatusSnapshot> {
        if self.deployment.state == DeploymentState::Initialized {
            self.generate_config().await?;
        }
        self.apply().await?;
        self.access_key().await?;
        let policy = self.settings.polling.convergence();
        match self.wait_for_cluster(expected, policy).await? {
            WaitOutcome::Converged { snapshot, .. } => Ok(snapshot),
            WaitOutcome::TimedOut { polls, .. } => Err(HarnessError::ConvergenceTimeout {
                budget: policy.budget,
                polls,
            }),
        }
    }

    /// Best-effort teardown: terraform destroy, resource group deletion and
    /// working directory removal, each attempted regardless of the others.
    pub async fn cleanup(&mut self) -> CleanupReport {
        if self.deployment.state == DeploymentState::Destroyed {
            debug!(parent: &self.span, "cleanup requested for destroyed deployment");
            return CleanupReport::already_destroyed();
        }
        if let Err(e) = self.transition(DeploymentState::Destroying) {
            warn!(parent: &self.span, error = %e, "unexpected state at cleanup");
            self.deployment.state = DeploymentState::Destroying;
        }

        let terraform_destroy = self.destroy_infrastructure().await;
        let delete_resource_group = {
            let rg = &self.deployment.names.resource_group;
            StepOutcome::from_result(self.cloud.delete_resource_group(rg).await)
        };
        let remove_work_dir = self.remove_work_dir().await;

        let report = CleanupReport {
            terraform_destroy,
            delete_resource_group,
            remove_work_dir,
        };
        for (step, outcome) in report.failures() {
            error!(parent: &self.span, step, %outcome, "cleanup step failed");
        }
        self.deployment.state = DeploymentState::Destroyed;
        info!(parent: &self.span, %report, "deployment destroyed");
        report
    }

    /// Same as [`DeploymentController::cleanup`].
    pub async fn destroy(&mut self) -> CleanupReport {
        self.cleanup().await
    }

    async fn destroy_infrastructure(&self) -> StepOutcome {
        if !self.deployment.work_dir.join(MAIN_TF).exists() {
            return StepOutcome::Skipped("no terraform config".to_string());
        }
        StepOutcome::from_result(self.run_terraform("destroy -auto-approve -input=false").await)
    }

    async fn remove_work_dir(&self) -> StepOutcome {
        remove_dir(&self.deployment.work_dir).await
    }
}

async fn remove_dir(dir: &Path) -> StepOutcome {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            StepOutcome::Skipped("working directory already gone".to_string())
        }
        Err(e) => StepOutcome::from_result::<()>(Err(e.into())),
    }
}
