use async_trait::async_trait;
use tracing::{info, warn};

use super::{Scenario, ScenarioContext, ScenarioFailure, ScenarioReport};
use crate::deploy::{ExpectedState, WaitOutcome, wait_until};

/// Reboots one backend and checks the cluster notices the lost drive, then
/// heals back to its original size.
#[derive(Debug, Clone, Copy)]
pub struct RebootScenario {
    node_index: u32,
}

impl RebootScenario {
    pub fn new(node_index: u32) -> Self {
        Self { node_index }
    }
}

impl Default for RebootScenario {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl Scenario for RebootScenario {
    fn name(&self) -> &str {
        "reboot"
    }

    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioReport, ScenarioFailure> {
        let mut report = ScenarioReport::new(self.name());
        let before = ctx.status().await?;
        let original = match before.active_drives() {
            Some(n) if before.clusterized && n > 0 => n,
            _ => {
                return Err(ScenarioFailure::Assertion(format!(
                    "cluster not healthy before reboot: {before}"
                )));
            }
        };
        report.note(format!("active drives before reboot: {original}"));

        ctx.cloud
            .reboot_node(
                &ctx.names.resource_group,
                ctx.target.prefix,
                ctx.target.cluster_name,
                self.node_index,
            )
            .await?;
        info!(parent: &ctx.span, node = self.node_index, original, "reboot requested");

        let degraded = ExpectedState::active_drives(original - 1);
        let detected = wait_until(ctx.status, ctx.target, &degraded, ctx.polling.fault_detection(), &ctx.span).await?;
        if !detected.is_converged() {
            warn!(parent: &ctx.span, polls = detected.polls(), "drive loss never observed");
            return Err(ScenarioFailure::timed_out("fault detection", &detected));
        }
        report.note(format!(
            "active drives dropped to {} after {} polls",
            original - 1,
            detected.polls()
        ));

        let healed = ExpectedState::converged(original);
        match wait_until(ctx.status, ctx.target, &healed, ctx.polling.convergence(), &ctx.span).await? {
            WaitOutcome::Converged { snapshot, polls, .. } => {
                report.note(format!("recovered to {original} active drives after {polls} polls"));
                report.final_status = Some(snapshot);
                Ok(report)
            }
            timed_out => Err(ScenarioFailure::timed_out("recovery", &timed_out)),
        }
    }
}
