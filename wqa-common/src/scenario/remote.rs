use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Scenario, ScenarioContext, ScenarioFailure, ScenarioReport, protection_mismatches};
use crate::errors::HarnessError;
use crate::outputs::{extract_instance_ip, extract_private_key_path, parse_weka_status};
use crate::runner::{CommandRunner, Invocation};
use crate::status::ProtectionScheme;

/// Logs into a backend over SSH and checks `weka status` agrees with the
/// expected protection scheme.
pub struct RemoteStatusScenario {
    expected: ProtectionScheme,
    node_index: u32,
    runner: Option<Arc<dyn CommandRunner>>,
}

impl RemoteStatusScenario {
    pub fn new(expected: ProtectionScheme) -> Self {
        Self {
            expected,
            node_index: 0,
            runner: None,
        }
    }

    pub fn on_node(mut self, node_index: u32) -> Self {
        self.node_index = node_index;
        self
    }

    /// Use `runner` instead of opening an SSH session from the apply output.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    #[cfg(unix)]
    fn connect(&self, ctx: &ScenarioContext<'_>) -> Result<Arc<dyn CommandRunner>, HarnessError> {
        use crate::runner::{SshRunner, SshSettings};

        let backend = format!("{}-{}-backend-{}", ctx.target.prefix, ctx.target.cluster_name, self.node_index);
        let missing = |what: &str| HarnessError::ConnectionFailure {
            host: backend.clone(),
            reason: format!("no {what} in terraform output"),
        };
        let ip = extract_instance_ip(ctx.apply_output, ctx.target.prefix, ctx.target.cluster_name, self.node_index)
            .ok_or_else(|| missing("address"))?;
        let key_path = extract_private_key_path(ctx.apply_output).ok_or_else(|| missing("SSH-KEY-PATH"))?;

        let mut settings = SshSettings::new(ctx.ssh_user, key_path);
        settings.connect_timeout = ctx.ssh_connect_timeout;
        Ok(Arc::new(SshRunner::new(ip, settings).with_span(ctx.span.clone())))
    }

    #[cfg(not(unix))]
    fn connect(&self, _ctx: &ScenarioContext<'_>) -> Result<Arc<dyn CommandRunner>, HarnessError> {
        Err(HarnessError::Config("remote status checks need an SSH-capable platform".into()))
    }
}

#[async_trait]
impl Scenario for RemoteStatusScenario {
    fn name(&self) -> &str {
        "remote-status"
    }

    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioReport, ScenarioFailure> {
        let runner = match &self.runner {
            Some(runner) => runner.clone(),
            None => self.connect(ctx)?,
        };
        let verdict = self.check(runner.as_ref(), ctx).await;
        match (runner.close().await, verdict) {
            (Ok(()), verdict) => verdict,
            (Err(e), Ok(mut report)) => {
                warn!(parent: &ctx.span, error = %e, "session teardown failed after a passing check");
                report.note(format!("session teardown failed: {e}"));
                Ok(report)
            }
            (Err(e), Err(failure)) => {
                warn!(parent: &ctx.span, error = %e, "session teardown failed");
                Err(failure)
            }
        }
    }
}

impl RemoteStatusScenario {
    async fn check(
        &self,
        runner: &dyn CommandRunner,
        ctx: &ScenarioContext<'_>,
    ) -> Result<ScenarioReport, ScenarioFailure> {
        let output = runner.run(&Invocation::new("weka status")).await?;
        if !output.success() {
            return Err(ScenarioFailure::Assertion(format!(
                "`weka status` exited with {}: {}",
                output.exit_code,
                output.stderr.join(" ")
            )));
        }

        let summary = parse_weka_status(&output.stdout);
        let actual = summary.protection().ok_or_else(|| {
            ScenarioFailure::Assertion("`weka status` shows no protection or hot spare line".into())
        })?;
        let mismatches = protection_mismatches(&self.expected, &actual);
        if !mismatches.is_empty() {
            return Err(ScenarioFailure::Assertion(mismatches.join("; ")));
        }

        info!(parent: &ctx.span, protection = %actual, "weka status matches");
        let mut report = ScenarioReport::new(self.name());
        report.note(format!("weka status reports protection {actual}"));
        Ok(report)
    }
}
