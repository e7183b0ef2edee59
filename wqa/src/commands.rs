//! Command implementations.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{info, info_span, warn};
use wqa_common::cloud;
use wqa_common::deploy::params::parse_assignment;
use wqa_common::deploy::{effective_parameters, naming, render_main_tf};
use wqa_common::scenario::{
    ProtectionScenario, RebootScenario, RemoteStatusScenario, Scenario, run_scenario,
};
use wqa_common::status::StatusTarget;
use wqa_common::{
    CleanupReport, Collaborators, DeploymentController, DeploymentParameters, ExpectedState,
    HarnessConfig, LocalRunner, ProtectionScheme, StatusClient, StatusSource,
};

use crate::{Cli, CloudArgs, Commands, ScenarioKind};

/// How a successful invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The harness worked but the cluster failed validation.
    ScenarioFailed,
}

/// `D,P,H` into a protection scheme.
pub fn parse_protection(raw: &str) -> Result<ProtectionScheme, String> {
    let parts: Vec<u32> = raw
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("expected DATA,PROTECTION,HOTSPARE, got '{raw}'"))?;
    match parts.as_slice() {
        [data, protection, hotspare] => Ok(ProtectionScheme::new(*data, *protection, *hotspare)),
        _ => Err(format!("expected three comma-separated numbers, got '{raw}'")),
    }
}

/// Configuration with command-line flags applied over file and environment.
pub fn build_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_cloud_args(&mut config, &cli.cloud);
    Ok(config)
}

fn apply_cloud_args(config: &mut HarnessConfig, args: &CloudArgs) {
    let cloud = &mut config.cloud;
    for (slot, flag) in [
        (&mut cloud.client_id, &args.client_id),
        (&mut cloud.client_secret, &args.client_secret),
        (&mut cloud.tenant_id, &args.tenant_id),
        (&mut cloud.subscription_id, &args.subscription_id),
    ] {
        if flag.is_some() {
            slot.clone_from(flag);
        }
    }
    if let Some(provider) = args.cloud {
        cloud.provider = provider;
    }
    if args.get_weka_io_token.is_some() {
        config.deployment.get_weka_io_token.clone_from(&args.get_weka_io_token);
    }
}

pub fn parse_overrides(set: &[String]) -> Result<DeploymentParameters> {
    let mut overrides = DeploymentParameters::default();
    for raw in set {
        let (key, value) = parse_assignment(raw)?;
        overrides.set(key, value);
    }
    Ok(overrides)
}

fn status_client(config: &HarnessConfig) -> Result<StatusClient> {
    Ok(StatusClient::new(&config.polling.status_base_url, config.polling.request_timeout)?
        .with_span(info_span!("status")))
}

fn collaborators(config: &HarnessConfig) -> Result<Collaborators> {
    let cloud = cloud::connect(
        config.cloud.provider,
        &config.cloud.credentials(),
        config.endpoints(),
        info_span!("cloud", provider = %config.cloud.provider),
    )
    .context("Cannot connect to the cloud provider")?;
    Ok(Collaborators {
        runner: Arc::new(LocalRunner::new()),
        cloud,
        status: Arc::new(status_client(config)?),
    })
}

fn write_json(out: &mut dyn Write, value: &serde_json::Value) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    write_json(&mut std::io::stdout(), value)
}

fn report_cleanup(report: &CleanupReport) {
    if report.is_clean() {
        info!(%report, "cleanup finished");
    } else {
        warn!(%report, "cleanup incomplete, check the resource group manually");
    }
}

pub async fn run(cli: Cli) -> Result<Outcome> {
    let config = build_config(&cli)?;
    let worker_id = cli.worker_id.as_str();

    match &cli.command {
        Commands::Render { set } => {
            render(&config, worker_id, set)?;
            Ok(Outcome::Success)
        }
        Commands::Deploy { set, keep } => {
            deploy(&config, worker_id, set, *keep).await?;
            Ok(Outcome::Success)
        }
        Commands::Status { prefix, cluster, key } => {
            let prefix = prefix.as_deref().unwrap_or(&config.deployment.prefix);
            status(&config, prefix, cluster, key).await?;
            Ok(Outcome::Success)
        }
        Commands::Scenario {
            kind,
            set,
            expect,
            node,
        } => scenario(&config, worker_id, *kind, set, *expect, *node).await,
        Commands::Destroy {
            workdir,
            resource_group,
        } => {
            let settings = config.deployment_settings()?;
            let mut controller = DeploymentController::adopt(
                workdir,
                resource_group.as_str(),
                settings,
                collaborators(&config)?,
            );
            let report = controller.destroy().await;
            print_json(&json!({ "cleanup": report }))?;
            if !report.is_clean() {
                bail!("cleanup incomplete: {report}");
            }
            Ok(Outcome::Success)
        }
    }
}

fn render(config: &HarnessConfig, worker_id: &str, set: &[String]) -> Result<()> {
    let settings = config.deployment_settings()?;
    let names = naming::generate(worker_id);
    let mut parameters = effective_parameters(&settings, &names, &parse_overrides(set)?);
    if parameters.contains("get_weka_io_token") {
        parameters.set("get_weka_io_token", json!("***"));
    }
    print!("{}", render_main_tf(&settings.template, &parameters)?);
    Ok(())
}

async fn deploy(config: &HarnessConfig, worker_id: &str, set: &[String], keep: bool) -> Result<()> {
    let settings = config.deployment_settings()?;
    let controller =
        DeploymentController::initialize(worker_id, settings, parse_overrides(set)?, collaborators(config)?);
    deploy_with(controller, keep, &mut std::io::stdout()).await
}

/// Provision, report to `out`, then tear down unless `keep`. Teardown runs
/// even when writing the report fails.
async fn deploy_with(
    mut controller: DeploymentController,
    keep: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let size = controller
        .deployment()
        .parameters
        .cluster_size()
        .context("Invalid deployment parameters")?;
    let snapshot = controller
        .provision(&ExpectedState::converged(size))
        .await
        .context("Deployment did not become ready")?;

    let printed = write_json(
        out,
        &json!({
            "deployment": controller.deployment(),
            "status": snapshot,
        }),
    );

    if keep {
        let names = controller.names();
        info!(
            work_dir = %controller.deployment().work_dir.display(),
            resource_group = %names.resource_group,
            "deployment kept; remove it with `wqa destroy`"
        );
        return printed.context("Failed to write deployment report");
    }
    report_cleanup(&controller.cleanup().await);
    printed.context("Failed to write deployment report")
}

async fn status(config: &HarnessConfig, prefix: &str, cluster: &str, key: &str) -> Result<()> {
    let client = status_client(config)?;
    let snapshot = client
        .get_status(StatusTarget {
            prefix,
            cluster_name: cluster,
            access_key: key,
        })
        .await?;
    print_json(&serde_json::to_value(&snapshot)?)
}

async fn scenario(
    config: &HarnessConfig,
    worker_id: &str,
    kind: ScenarioKind,
    set: &[String],
    expect: Option<ProtectionScheme>,
    node: u32,
) -> Result<Outcome> {
    let settings = config.deployment_settings()?;
    let mut controller =
        DeploymentController::initialize(worker_id, settings, parse_overrides(set)?, collaborators(config)?);
    let expected = match expect {
        Some(expected) => expected,
        None => ProtectionScenario::from_parameters(&controller.deployment().parameters)
            .context("Invalid deployment parameters")?
            .expected(),
    };
    let scenario: Box<dyn Scenario> = match kind {
        ScenarioKind::Protection => Box::new(ProtectionScenario::new(expected)),
        ScenarioKind::Reboot => Box::new(RebootScenario::new(node)),
        ScenarioKind::RemoteStatus => Box::new(RemoteStatusScenario::new(expected).on_node(node)),
    };

    let run = run_scenario(&mut controller, scenario.as_ref()).await;
    report_cleanup(&run.cleanup);
    match run.result {
        Ok(report) => {
            print_json(&json!({ "result": "passed", "report": report, "cleanup": run.cleanup }))?;
            Ok(Outcome::Success)
        }
        Err(failure) if failure.is_test_failure() => {
            print_json(&json!({
                "result": "failed",
                "reason": failure.to_string(),
                "cleanup": run.cleanup,
            }))?;
            Ok(Outcome::ScenarioFailed)
        }
        Err(failure) => Err(failure).context(format!("Scenario '{}' could not run", scenario.name())),
    }
}
