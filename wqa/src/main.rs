//! Weka-on-Azure QA harness
//!
//! Provisions a Weka cluster through terraform, waits for it to converge,
//! runs validation scenarios against it and tears it down again.

#![forbid(unsafe_code)]

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::error;
use wqa_common::logging::{LogConfig, LogFormat, init_logging};
use wqa_common::{CloudProvider, ProtectionScheme};

use crate::commands::Outcome;

#[derive(Parser)]
#[command(name = "wqa")]
#[command(author, version, about = "Weka-on-Azure deployment QA harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "WQA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Test worker identifier; becomes part of every resource name
    #[arg(long, global = true, env = "WQA_WORKER_ID", default_value = "gw0")]
    worker_id: String,

    #[command(flatten)]
    cloud: CloudArgs,
}

/// Cloud credentials. Optional until a command actually talks to the cloud.
#[derive(Args, Debug, Default)]
struct CloudArgs {
    /// Service principal application id
    #[arg(long, global = true, env = "ARM_CLIENT_ID")]
    client_id: Option<String>,

    /// Service principal secret
    #[arg(long, global = true, env = "ARM_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, global = true, env = "ARM_TENANT_ID")]
    tenant_id: Option<String>,

    #[arg(long, global = true, env = "ARM_SUBSCRIPTION_ID")]
    subscription_id: Option<String>,

    /// Cloud provider backend
    #[arg(long, global = true, value_enum)]
    cloud: Option<CloudProvider>,

    /// Token for downloading Weka from get.weka.io
    #[arg(long, global = true, env = "WQA_GET_WEKA_IO_TOKEN", hide_env_values = true)]
    get_weka_io_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated main.tf without touching the cloud
    Render {
        /// Parameter override, KEY=VALUE (JSON values allowed)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Provision a cluster and wait for it to converge
    Deploy {
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Leave the deployment running instead of destroying it
        #[arg(long)]
        keep: bool,
    },

    /// Query the status function of a running cluster once
    Status {
        /// Resource name prefix (defaults to the configured one)
        #[arg(long)]
        prefix: Option<String>,

        #[arg(long)]
        cluster: String,

        /// Status function key
        #[arg(long, env = "WQA_STATUS_KEY", hide_env_values = true)]
        key: String,
    },

    /// Provision, run one validation scenario, destroy
    Scenario {
        #[arg(value_enum)]
        kind: ScenarioKind,

        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Expected protection as DATA,PROTECTION,HOTSPARE (e.g. 3,2,1)
        #[arg(long, value_parser = commands::parse_protection)]
        expect: Option<ProtectionScheme>,

        /// Backend index to reboot or log into
        #[arg(long, default_value_t = 0)]
        node: u32,
    },

    /// Best-effort cleanup of a deployment kept with `deploy --keep`
    Destroy {
        /// Working directory of the deployment
        #[arg(long)]
        workdir: PathBuf,

        #[arg(long)]
        resource_group: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScenarioKind {
    Protection,
    Reboot,
    RemoteStatus,
}

fn parse_log_format(raw: &str) -> Result<LogFormat, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = match LogConfig::from_env("info") {
        Ok(config) => config.with_stderr(),
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    let _logging_guards = match init_logging(&log_config) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match commands::run(cli).await {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::ScenarioFailed) => ExitCode::from(2),
        Err(e) => {
            error!(error = %format!("{e:#}"), "wqa failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
