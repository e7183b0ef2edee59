use async_trait::async_trait;
use tracing::info;

use super::{Scenario, ScenarioContext, ScenarioFailure, ScenarioReport, protection_mismatches};
use crate::deploy::DeploymentParameters;
use crate::errors::HarnessResult;
use crate::status::ProtectionScheme;

/// Widest stripe the cluster will build regardless of size.
pub const MAX_STRIPE_DATA_DRIVES: u32 = 16;

/// Checks the stripe layout and hot spare count reported by the status
/// function against an expected scheme.
#[derive(Debug, Clone)]
pub struct ProtectionScenario {
    expected: ProtectionScheme,
}

impl ProtectionScenario {
    pub fn new(expected: ProtectionScheme) -> Self {
        Self { expected }
    }

    /// Layout a cluster built from `parameters` should end up with.
    pub fn from_parameters(parameters: &DeploymentParameters) -> HarnessResult<Self> {
        let protection = parameters.protection_level()?;
        let hotspare = parameters.hotspare()?;
        let data = parameters
            .cluster_size()?
            .saturating_sub(protection)
            .saturating_sub(hotspare)
            .min(MAX_STRIPE_DATA_DRIVES);
        Ok(Self::new(ProtectionScheme::new(data, protection, hotspare)))
    }

    pub fn expected(&self) -> ProtectionScheme {
        self.expected
    }
}

#[async_trait]
impl Scenario for ProtectionScenario {
    fn name(&self) -> &str {
        "protection"
    }

    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioReport, ScenarioFailure> {
        let snapshot = ctx.status().await?;
        if !snapshot.clusterized {
            return Err(ScenarioFailure::Assertion("cluster is not clusterized".into()));
        }
        let actual = snapshot.protection.ok_or_else(|| {
            ScenarioFailure::Assertion("status reports no protection scheme".into())
        })?;

        let mismatches = protection_mismatches(&self.expected, &actual);
        if !mismatches.is_empty() {
            return Err(ScenarioFailure::Assertion(mismatches.join("; ")));
        }

        info!(parent: &ctx.span, protection = %actual, "protection scheme verified");
        let mut report = ScenarioReport::new(self.name());
        report.note(format!("protection {actual}"));
        report.final_status = Some(snapshot);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{DeploymentNames, PollingSettings};
    use crate::mock::{FakeCloud, ScriptedStatus, snapshot};
    use crate::status::{ClusterStatusSnapshot, DriveCounts, StatusTarget};
    use serde_json::json;
    use std::time::Duration;
    use tracing::Span;

    fn names() -> DeploymentNames {
        DeploymentNames {
            id: "gw0-abc".into(),
            resource_group: "wqa-gw0-abc-rg".into(),
            cluster_name: "gw0-abc".into(),
        }
    }

    async fn run_against(scenario: &ProtectionScenario, status: &ScriptedStatus) -> Result<ScenarioReport, ScenarioFailure> {
        let names = names();
        let params = DeploymentParameters::defaults();
        let cloud = FakeCloud::new();
        let ctx = ScenarioContext {
            names: &names,
            parameters: &params,
            target: StatusTarget {
                prefix: "weka",
                cluster_name: &names.cluster_name,
                access_key: "k",
            },
            status,
            cloud: &cloud,
            polling: PollingSettings::default(),
            apply_output: &[],
            ssh_user: "weka",
            ssh_connect_timeout: Duration::from_secs(5),
            span: Span::none(),
        };
        scenario.run(&ctx).await
    }

    fn with_size(size: u64, protection: u64, hotspare: u64) -> DeploymentParameters {
        DeploymentParameters::defaults().merge(&DeploymentParameters::from_map(
            [
                ("cluster_size".to_string(), json!(size)),
                ("protection_level".to_string(), json!(protection)),
                ("hotspare".to_string(), json!(hotspare)),
            ]
            .into_iter()
            .collect(),
        ))
    }

    #[test]
    fn derived_expectations() {
        let cases = [
            (with_size(6, 2, 1), ProtectionScheme::new(3, 2, 1)),
            (with_size(19, 2, 1), ProtectionScheme::new(16, 2, 1)),
            (with_size(40, 4, 2), ProtectionScheme::new(16, 4, 2)),
            (with_size(10, 4, 1), ProtectionScheme::new(5, 4, 1)),
        ];
        for (params, expected) in cases {
            assert_eq!(ProtectionScenario::from_parameters(&params).unwrap().expected(), expected);
        }
    }

    #[tokio::test]
    async fn default_layout_passes() {
        let scenario = ProtectionScenario::new(ProtectionScheme::new(3, 2, 1));
        let report = run_against(&scenario, &ScriptedStatus::repeating(snapshot(true, 6, 6)))
            .await
            .unwrap();
        assert_eq!(report.details, vec!["protection 3+2 (hot spare 1)"]);
    }

    #[tokio::test]
    async fn every_mismatch_is_reported() {
        let scenario = ProtectionScenario::new(ProtectionScheme::new(7, 4, 0));
        let err = run_against(&scenario, &ScriptedStatus::repeating(snapshot(true, 10, 10)))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("stripe data drives: expected 7, got 3"));
        assert!(message.contains("stripe protection drives: expected 4, got 2"));
        assert!(message.contains("hot spare: expected 0, got 1"));
        assert!(err.is_test_failure());
    }

    #[tokio::test]
    async fn missing_protection_is_an_assertion() {
        let bare = ClusterStatusSnapshot::new(true, Some(DriveCounts { total: 6, active: 6 }), None);
        let scenario = ProtectionScenario::new(ProtectionScheme::new(3, 2, 1));
        let err = run_against(&scenario, &ScriptedStatus::repeating(bare)).await.unwrap_err();
        assert!(matches!(err, ScenarioFailure::Assertion(_)));
    }
}
