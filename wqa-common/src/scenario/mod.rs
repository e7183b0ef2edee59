//! Scenario validators run against a converged deployment.
//!
//! A scenario either passes with a [`ScenarioReport`] or fails with a
//! [`ScenarioFailure`] that separates "the cluster misbehaved" (assertion,
//! timed-out wait) from "the harness broke" ([`HarnessError`]).
//! [`run_scenario`] owns the lifecycle around it and always cleans up.

mod protection;
mod reboot;
mod remote;

pub use protection::ProtectionScenario;
pub use reboot::RebootScenario;
pub use remote::RemoteStatusScenario;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{Span, error, info, info_span};

use crate::cloud::CloudClient;
use crate::deploy::{
    CleanupReport, DeploymentController, DeploymentNames, DeploymentParameters, DeploymentState,
    ExpectedState, PollingSettings, WaitOutcome,
};
use crate::errors::{HarnessError, HarnessResult};
use crate::status::{ClusterStatusSnapshot, ProtectionScheme, StatusSource, StatusTarget};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioFailure {
    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("timed out during {phase} after {polls} polls: {detail}")]
    TimedOut {
        phase: &'static str,
        polls: u32,
        detail: String,
    },

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl ScenarioFailure {
    /// True when the cluster, not the harness, is at fault.
    pub fn is_test_failure(&self) -> bool {
        !matches!(self, Self::Harness(_))
    }

    pub(crate) fn timed_out(phase: &'static str, outcome: &WaitOutcome) -> Self {
        let detail = match outcome {
            WaitOutcome::TimedOut {
                last_evaluation: Some(evaluation),
                ..
            } => evaluation.to_string(),
            _ => "no status observed".to_string(),
        };
        Self::TimedOut {
            phase,
            polls: outcome.polls(),
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub details: Vec<String>,
    pub final_status: Option<ClusterStatusSnapshot>,
    #[serde(serialize_with = "serialize_whole_seconds")]
    pub duration: Duration,
}

fn serialize_whole_seconds<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(Duration::from_secs(d.as_secs())).to_string())
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            details: Vec::new(),
            final_status: None,
            duration: Duration::ZERO,
        }
    }

    pub fn note(&mut self, detail: impl Into<String>) {
        self.details.push(detail.into());
    }
}

/// What a scenario may touch: the deployment's status and cloud handles,
/// its identity and the settings it was provisioned with.
pub struct ScenarioContext<'a> {
    pub names: &'a DeploymentNames,
    pub parameters: &'a DeploymentParameters,
    pub target: StatusTarget<'a>,
    pub status: &'a dyn StatusSource,
    pub cloud: &'a dyn CloudClient,
    pub polling: PollingSettings,
    pub apply_output: &'a [String],
    pub ssh_user: &'a str,
    pub ssh_connect_timeout: Duration,
    pub span: Span,
}

impl<'a> ScenarioContext<'a> {
    /// Context for a controller whose access key has been fetched.
    pub fn from_controller(controller: &'a DeploymentController, access_key: &'a str, span: Span) -> Self {
        let deployment = controller.deployment();
        let settings = controller.settings();
        Self {
            names: &deployment.names,
            parameters: &deployment.parameters,
            target: StatusTarget {
                prefix: &deployment.prefix,
                cluster_name: &deployment.names.cluster_name,
                access_key,
            },
            status: controller.status_source(),
            cloud: controller.cloud(),
            polling: settings.polling,
            apply_output: controller.apply_output(),
            ssh_user: &settings.ssh_user,
            ssh_connect_timeout: settings.ssh_connect_timeout,
            span,
        }
    }

    pub async fn status(&self) -> Result<ClusterStatusSnapshot, ScenarioFailure> {
        Ok(self.status.get_status(self.target).await?)
    }
}

#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// State the deployment has to reach before [`Scenario::run`].
    fn readiness(&self, parameters: &DeploymentParameters) -> HarnessResult<ExpectedState> {
        Ok(ExpectedState::converged(parameters.cluster_size()?))
    }

    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioReport, ScenarioFailure>;
}

/// Every field of `actual` that differs from `expected`, in the order data
/// drives, protection drives, hot spare.
pub(crate) fn protection_mismatches(expected: &ProtectionScheme, actual: &ProtectionScheme) -> Vec<String> {
    [
        ("stripe data drives", expected.stripe_data_drives, actual.stripe_data_drives),
        (
            "stripe protection drives",
            expected.stripe_protection_drives,
            actual.stripe_protection_drives,
        ),
        ("hot spare", expected.hot_spare, actual.hot_spare),
    ]
    .into_iter()
    .filter(|(_, e, a)| e != a)
    .map(|(field, e, a)| format!("{field}: expected {e}, got {a}"))
    .collect()
}

/// Result of [`run_scenario`]: the scenario verdict plus how teardown went.
#[derive(Debug)]
pub struct ScenarioRun {
    pub result: Result<ScenarioReport, ScenarioFailure>,
    pub cleanup: CleanupReport,
}

/// Provision (unless already ready), run `scenario`, then clean up no
/// matter how either step ended.
pub async fn run_scenario(controller: &mut DeploymentController, scenario: &dyn Scenario) -> ScenarioRun {
    let span = info_span!(parent: controller.span(), "scenario", name = scenario.name());
    let result = execute(controller, scenario, &span).await;
    match &result {
        Ok(report) => info!(parent: &span, details = report.details.len(), "scenario passed"),
        Err(failure) => error!(parent: &span, error = %failure, "scenario failed"),
    }
    let cleanup = controller.cleanup().await;
    ScenarioRun { result, cleanup }
}

async fn execute(
    controller: &mut DeploymentController,
    scenario: &dyn Scenario,
    span: &Span,
) -> Result<ScenarioReport, ScenarioFailure> {
    if controller.state() != DeploymentState::Ready {
        let expected = scenario.readiness(&controller.deployment().parameters)?;
        match controller.provision(&expected).await {
            Ok(snapshot) => info!(parent: span, %snapshot, "deployment ready"),
            Err(HarnessError::ConvergenceTimeout { budget, polls }) => {
                return Err(ScenarioFailure::TimedOut {
                    phase: "initial convergence",
                    polls,
                    detail: format!("not converged within {}", humantime::format_duration(budget)),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    let key = controller.access_key().await?;
    let ctx = ScenarioContext::from_controller(controller, &key, span.clone());
    let started = Instant::now();
    let mut report = scenario.run(&ctx).await?;
    report.duration = started.elapsed();
    Ok(report)
}
