//! Full deployment lifecycle against a scripted terraform, a fake cloud
//! and a scripted status function.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wqa_common::mock::{FakeCloud, ScriptedStatus, pending, snapshot};
use wqa_common::scenario::{ProtectionScenario, RebootScenario};
use wqa_common::{
    Collaborators, DeploymentController, DeploymentParameters, DeploymentSettings, DeploymentState,
    ExpectedState, HarnessError, LocalRunner, ProtectionScheme, ScenarioFailure, run_scenario,
};

use crate::common::{FakeTerraform, init_test_logging};

struct Harness {
    _root: TempDir,
    terraform: FakeTerraform,
    cloud: Arc<FakeCloud>,
    status: Arc<ScriptedStatus>,
    controller: DeploymentController,
}

fn harness(apply_exit: i32, status: ScriptedStatus) -> Harness {
    let root = TempDir::new().unwrap();
    let terraform = FakeTerraform::new(apply_exit);

    let mut settings = DeploymentSettings::new(root.path());
    settings.terraform_binary = terraform.binary();
    settings.credentials.subscription_id = Some("sub-42".into());
    settings.polling.interval = Duration::from_millis(10);
    settings.polling.fault_poll_interval = Duration::from_millis(10);
    settings.polling.convergence_timeout = Duration::from_secs(2);
    settings.polling.fault_detection_timeout = Duration::from_secs(5);

    let cloud = Arc::new(FakeCloud::new());
    let status = Arc::new(status);
    let controller = DeploymentController::initialize(
        "gw1",
        settings,
        DeploymentParameters::default(),
        Collaborators {
            runner: Arc::new(LocalRunner::new()),
            cloud: cloud.clone(),
            status: status.clone(),
        },
    );
    Harness {
        _root: root,
        terraform,
        cloud,
        status,
        controller,
    }
}

#[tokio::test]
async fn test_provision_and_cleanup_with_scripted_terraform() {
    init_test_logging();
    crate::test_log!("TEST START: test_provision_and_cleanup_with_scripted_terraform");

    let mut h = harness(0, ScriptedStatus::new(vec![pending(), snapshot(true, 6, 6)]));
    let work_dir = h.controller.deployment().work_dir.clone();

    let ready = h.controller.provision(&ExpectedState::converged(6)).await.unwrap();
    assert!(ready.clusterized);
    assert_eq!(h.controller.state(), DeploymentState::Ready);
    assert_eq!(h.status.calls(), 2);
    assert!(work_dir.join("main.tf").exists());
    assert!(
        h.controller
            .apply_output()
            .iter()
            .any(|line| line.contains("Apply complete!"))
    );

    let calls = h.terraform.calls();
    assert_eq!(calls.len(), 2, "{calls:?}");
    assert!(calls[0].starts_with("init -input=false"));
    assert!(calls[1].starts_with("apply -auto-approve -input=false"));
    assert!(calls.iter().all(|c| c.ends_with("sub=sub-42")));
    assert_eq!(h.cloud.count("create_resource_group"), 1);

    let report = h.controller.cleanup().await;
    assert!(report.is_clean(), "{report}");
    assert_eq!(h.controller.state(), DeploymentState::Destroyed);
    assert!(h.terraform.calls()[2].starts_with("destroy -auto-approve"));
    assert_eq!(h.cloud.count("delete_resource_group"), 1);
    assert!(!work_dir.exists());

    // second cleanup does nothing
    assert!(h.controller.cleanup().await.is_clean());
    assert_eq!(h.terraform.calls().len(), 3);
    assert_eq!(h.cloud.count("delete_resource_group"), 1);
    crate::test_log!("TEST PASS: test_provision_and_cleanup_with_scripted_terraform");
}

#[tokio::test]
async fn test_failed_apply_is_cleaned_up_once() {
    init_test_logging();
    crate::test_log!("TEST START: test_failed_apply_is_cleaned_up_once");

    let mut h = harness(3, ScriptedStatus::repeating(snapshot(true, 6, 6)));
    let work_dir = h.controller.deployment().work_dir.clone();

    let err = h.controller.provision(&ExpectedState::converged(6)).await.unwrap_err();
    match err {
        HarnessError::CommandFailure {
            exit_code,
            stderr_tail,
            ..
        } => {
            assert_eq!(exit_code, 3);
            assert!(stderr_tail.iter().any(|l| l.contains("quota exceeded")), "{stderr_tail:?}");
        }
        other => panic!("expected command failure, got {other:?}"),
    }

    assert_eq!(h.controller.state(), DeploymentState::Destroyed);
    assert_eq!(h.status.calls(), 0);
    let destroys = h.terraform.calls().iter().filter(|c| c.starts_with("destroy")).count();
    assert_eq!(destroys, 1);
    assert_eq!(h.cloud.count("delete_resource_group"), 1);
    assert!(!work_dir.exists());

    h.controller.cleanup().await;
    assert_eq!(h.cloud.count("delete_resource_group"), 1);
    crate::test_log!("TEST PASS: test_failed_apply_is_cleaned_up_once");
}

#[tokio::test]
async fn test_reboot_scenario_end_to_end() {
    init_test_logging();
    crate::test_log!("TEST START: test_reboot_scenario_end_to_end");

    let mut h = harness(
        0,
        ScriptedStatus::new(vec![
            pending(),
            snapshot(true, 6, 6),
            snapshot(true, 6, 6),
            snapshot(true, 6, 5),
            snapshot(true, 6, 5),
            snapshot(true, 6, 6),
        ]),
    );
    let rg = h.controller.names().resource_group.clone();

    let run = run_scenario(&mut h.controller, &RebootScenario::new(2)).await;
    let report = run.result.unwrap();
    assert_eq!(report.scenario, "reboot");
    assert_eq!(report.final_status.as_ref().and_then(|s| s.active_drives()), Some(6));
    assert!(run.cleanup.is_clean(), "{}", run.cleanup);
    assert!(h.cloud.calls().contains(&format!("reboot_node {rg} 2")));
    assert_eq!(h.status.calls(), 6);
    assert_eq!(h.controller.state(), DeploymentState::Destroyed);
    crate::test_log!("TEST PASS: test_reboot_scenario_end_to_end");
}

#[tokio::test]
async fn test_protection_mismatch_fails_scenario_but_still_cleans_up() {
    init_test_logging();

    let mut h = harness(0, ScriptedStatus::repeating(snapshot(true, 6, 6)));
    let scenario = ProtectionScenario::new(ProtectionScheme::new(4, 2, 1));

    let run = run_scenario(&mut h.controller, &scenario).await;
    match run.result {
        Err(ScenarioFailure::Assertion(message)) => {
            assert!(message.contains("stripe data drives: expected 4, got 3"), "{message}");
        }
        other => panic!("expected assertion failure, got {other:?}"),
    }
    assert!(run.cleanup.is_clean());
    assert_eq!(h.cloud.count("delete_resource_group"), 1);
    assert!(h.terraform.calls().iter().any(|c| c.starts_with("destroy")));
}

#[tokio::test]
async fn test_initial_convergence_timeout_is_a_test_failure() {
    init_test_logging();

    let mut h = harness(0, ScriptedStatus::repeating(pending()));
    let run = run_scenario(&mut h.controller, &ProtectionScenario::new(ProtectionScheme::new(3, 2, 1))).await;
    let failure = run.result.unwrap_err();
    assert!(failure.is_test_failure());
    assert!(matches!(
        failure,
        ScenarioFailure::TimedOut {
            phase: "initial convergence",
            ..
        }
    ));
    assert!(run.cleanup.is_clean());
    assert_eq!(h.cloud.count("delete_resource_group"), 1);
}
