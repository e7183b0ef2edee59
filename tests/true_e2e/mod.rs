//! Live suite against a real Azure subscription.
//!
//! Every test provisions its own cluster and always destroys it, so a
//! full run takes well over an hour and costs money.
//!
//! ```bash
//! export ARM_CLIENT_ID=... ARM_CLIENT_SECRET=... ARM_TENANT_ID=... ARM_SUBSCRIPTION_ID=...
//! export WQA_GET_WEKA_IO_TOKEN=...
//! cargo test -p wqa --features true-e2e --test true_e2e -- --nocapture --test-threads=4
//! ```
//!
//! Tests return early with a note when credentials are absent.

use std::sync::Arc;

use tracing::info_span;
use tracing_subscriber::{EnvFilter, fmt};
use wqa_common::scenario::{ProtectionScenario, RebootScenario, RemoteStatusScenario};
use wqa_common::{
    Collaborators, DeploymentController, DeploymentParameters, ExpectedState, HarnessConfig,
    LocalRunner, ProtectionScheme, Scenario, StatusClient, cloud, run_scenario,
};

fn init_logging() {
    let _ = fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("wqa_common=info"))
        .try_init();
}

/// Configuration with `ARM_*` credentials, or `None` when they are missing.
fn live_config() -> Option<HarnessConfig> {
    let mut config = HarnessConfig::load(None).expect("invalid WQA_* configuration");
    let cloud = &mut config.cloud;
    for (slot, var) in [
        (&mut cloud.client_id, "ARM_CLIENT_ID"),
        (&mut cloud.client_secret, "ARM_CLIENT_SECRET"),
        (&mut cloud.tenant_id, "ARM_TENANT_ID"),
        (&mut cloud.subscription_id, "ARM_SUBSCRIPTION_ID"),
    ] {
        *slot = Some(std::env::var(var).ok().filter(|v| !v.is_empty())?);
    }
    Some(config)
}

fn controller(config: &HarnessConfig, worker: &str, overrides: &[(&str, serde_json::Value)]) -> DeploymentController {
    let collaborators = Collaborators {
        runner: Arc::new(LocalRunner::new()),
        cloud: cloud::connect(
            config.cloud.provider,
            &config.cloud.credentials(),
            config.endpoints(),
            info_span!("cloud"),
        )
        .expect("cloud client"),
        status: Arc::new(
            StatusClient::new(&config.polling.status_base_url, config.polling.request_timeout)
                .expect("status client"),
        ),
    };
    let mut params = DeploymentParameters::default();
    for (key, value) in overrides {
        params.set(*key, value.clone());
    }
    DeploymentController::initialize(
        worker,
        config.deployment_settings().expect("deployment settings"),
        params,
        collaborators,
    )
}

async fn run_live(worker: &str, overrides: &[(&str, serde_json::Value)], scenario: &dyn Scenario) {
    init_logging();
    let Some(config) = live_config() else {
        eprintln!("skipping {}: ARM_* credentials not set", scenario.name());
        return;
    };
    let mut controller = controller(&config, worker, overrides);
    let run = run_scenario(&mut controller, scenario).await;
    assert!(run.cleanup.is_clean(), "cleanup incomplete: {}", run.cleanup);
    let report = run.result.unwrap_or_else(|e| panic!("{} failed: {e}", scenario.name()));
    eprintln!("{}: {:?}", report.scenario, report.details);
}

#[tokio::test]
async fn test_live_default_cluster_protection() {
    run_live("e2e-prot", &[], &ProtectionScenario::new(ProtectionScheme::new(3, 2, 1))).await;
}

#[tokio::test]
async fn test_live_ten_node_cluster_protection() {
    let overrides = [
        ("cluster_size", serde_json::json!(10)),
        ("protection_level", serde_json::json!(4)),
        ("hotspare", serde_json::json!(1)),
    ];
    run_live("e2e-p10", &overrides, &ProtectionScenario::new(ProtectionScheme::new(7, 2, 1))).await;
}

#[tokio::test]
async fn test_live_reboot_recovers() {
    run_live("e2e-boot", &[], &RebootScenario::new(0)).await;
}

#[tokio::test]
async fn test_live_remote_weka_status() {
    run_live(
        "e2e-ssh",
        &[],
        &RemoteStatusScenario::new(ProtectionScheme::new(3, 2, 1)),
    )
    .await;
}

#[tokio::test]
async fn test_live_status_endpoint_converges() {
    init_logging();
    let Some(config) = live_config() else {
        eprintln!("skipping: ARM_* credentials not set");
        return;
    };
    let mut controller = controller(&config, "e2e-conv", &[]);
    let result = controller.provision(&ExpectedState::converged(6)).await;
    let cleanup = controller.cleanup().await;
    let snapshot = result.expect("cluster did not converge");
    assert!(snapshot.clusterized);
    assert!(cleanup.is_clean(), "{cleanup}");
}
