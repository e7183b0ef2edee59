//! Harness configuration.
//!
//! Layers, later wins: built-in defaults, a TOML file (`--config` or
//! `WQA_CONFIG`), `WQA_*` environment variables, then command-line flags
//! (applied by the binary). Credentials may stay empty here; they are only
//! checked when a cloud call is about to be made.

pub mod env;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cloud::{AzureEndpoints, CloudCredentials, CloudProvider};
use crate::deploy::params::DEFAULT_TEMPLATE;
use crate::deploy::{DeploymentParameters, DeploymentSettings, PollingSettings};
use crate::errors::{HarnessError, HarnessResult};
use crate::status::DEFAULT_STATUS_BASE_URL;

pub use env::{EnvError, EnvParser};

/// Variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "WQA_CONFIG";

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// `[cloud]`: provider, service principal and endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    pub provider: CloudProvider,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
    pub management_endpoint: String,
    pub login_endpoint: String,
}

impl Default for CloudSection {
    fn default() -> Self {
        let endpoints = AzureEndpoints::default();
        Self {
            provider: CloudProvider::Azure,
            client_id: None,
            client_secret: None,
            tenant_id: None,
            subscription_id: None,
            management_endpoint: endpoints.management,
            login_endpoint: endpoints.login,
        }
    }
}

impl CloudSection {
    pub fn credentials(&self) -> CloudCredentials {
        CloudCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            tenant_id: self.tenant_id.clone(),
            subscription_id: self.subscription_id.clone(),
        }
    }
}

/// `[deployment]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentSection {
    /// Parent of the per-deployment working directories.
    pub work_root: Option<PathBuf>,
    pub terraform_binary: String,
    /// Template with a `%PARAMETERS%` marker; built-in one when unset.
    pub template_path: Option<PathBuf>,
    pub prefix: String,
    pub get_weka_io_token: Option<String>,
    /// Applied to every deployment, under per-run overrides.
    pub parameters: DeploymentParameters,
}

impl Default for DeploymentSection {
    fn default() -> Self {
        Self {
            work_root: None,
            terraform_binary: "terraform".to_string(),
            template_path: None,
            prefix: "weka".to_string(),
            get_weka_io_token: None,
            parameters: DeploymentParameters::default(),
        }
    }
}

/// `[polling]`. Durations are humantime strings such as `90s` or `30m`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    #[serde(with = "humantime_duration")]
    pub interval: Duration,
    #[serde(with = "humantime_duration")]
    pub convergence_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub fault_detection_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub fault_poll_interval: Duration,
    #[serde(with = "humantime_duration")]
    /// Per HTTP request to the status endpoint.
    pub request_timeout: Duration,
    pub status_base_url: String,
}

impl Default for PollingSection {
    fn default() -> Self {
        let polling = PollingSettings::default();
        Self {
            interval: polling.interval,
            convergence_timeout: polling.convergence_timeout,
            fault_detection_timeout: polling.fault_detection_timeout,
            fault_poll_interval: polling.fault_poll_interval,
            request_timeout: Duration::from_secs(30),
            status_base_url: DEFAULT_STATUS_BASE_URL.to_string(),
        }
    }
}

impl PollingSection {
    pub fn settings(&self) -> PollingSettings {
        PollingSettings {
            interval: self.interval,
            convergence_timeout: self.convergence_timeout,
            fault_detection_timeout: self.fault_detection_timeout,
            fault_poll_interval: self.fault_poll_interval,
        }
    }
}

/// `[ssh]`: login user and connect timeout for backend hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub user: String,
    #[serde(with = "humantime_duration")]
    pub connect_timeout: Duration,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            user: "weka".to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Whole harness configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub cloud: CloudSection,
    pub deployment: DeploymentSection,
    pub polling: PollingSection,
    pub ssh: SshSection,
}

/// `…/wqa/deployments` under the user's cache directory.
pub fn default_work_root() -> PathBuf {
    directories::ProjectDirs::from("io", "weka", "wqa")
        .map(|dirs| dirs.cache_dir().join("deployments"))
        .unwrap_or_else(|| std::env::temp_dir().join("wqa").join("deployments"))
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> HarnessResult<Self> {
        toml::from_str(text).map_err(|e| HarnessError::Config(format!("invalid config: {e}")))
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| HarnessError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Defaults, then `path` (or `$WQA_CONFIG`) if given, then `WQA_*`.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(&mut EnvParser::new())?;
        Ok(config)
    }

    /// Overlay `WQA_*` variables. Fails listing every malformed variable.
    pub fn apply_env(&mut self, env: &mut EnvParser) -> HarnessResult<()> {
        const MIN_INTERVAL: Duration = Duration::from_secs(1);

        if let Some(provider) = env.get_provider("CLOUD") {
            self.cloud.provider = provider;
        }
        if let Some(v) = env.get_string("MANAGEMENT_ENDPOINT") {
            self.cloud.management_endpoint = v;
        }
        if let Some(v) = env.get_string("LOGIN_ENDPOINT") {
            self.cloud.login_endpoint = v;
        }

        if let Some(v) = env.get_path("WORK_ROOT") {
            self.deployment.work_root = Some(v);
        }
        if let Some(v) = env.get_string("TERRAFORM_BINARY") {
            self.deployment.terraform_binary = v;
        }
        if let Some(v) = env.get_path("TEMPLATE_PATH") {
            self.deployment.template_path = Some(v);
        }
        if let Some(v) = env.get_string("PREFIX") {
            self.deployment.prefix = v;
        }
        if let Some(v) = env.get_string("GET_WEKA_IO_TOKEN") {
            self.deployment.get_weka_io_token = Some(v);
        }

        let polling = &mut self.polling;
        for (name, slot, min) in [
            ("POLL_INTERVAL", &mut polling.interval, MIN_INTERVAL),
            ("CONVERGENCE_TIMEOUT", &mut polling.convergence_timeout, Duration::ZERO),
            ("FAULT_DETECTION_TIMEOUT", &mut polling.fault_detection_timeout, Duration::ZERO),
            ("FAULT_POLL_INTERVAL", &mut polling.fault_poll_interval, MIN_INTERVAL),
            ("REQUEST_TIMEOUT", &mut polling.request_timeout, MIN_INTERVAL),
        ] {
            if let Some(d) = env.get_duration(name, min) {
                *slot = d;
            }
        }
        if let Some(v) = env.get_string("STATUS_BASE_URL") {
            polling.status_base_url = v;
        }

        if let Some(v) = env.get_string("SSH_USER") {
            self.ssh.user = v;
        }
        if let Some(d) = env.get_duration("SSH_CONNECT_TIMEOUT", MIN_INTERVAL) {
            self.ssh.connect_timeout = d;
        }

        let errors = env.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            let listed: Vec<String> = errors.iter().map(ToString::to_string).collect();
            Err(HarnessError::Config(listed.join("; ")))
        }
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> HarnessResult<()> {
        let mut problems = Vec::new();
        if self.polling.interval.is_zero() || self.polling.fault_poll_interval.is_zero() {
            problems.push("poll intervals must be non-zero".to_string());
        }
        if self.deployment.prefix.trim().is_empty() {
            problems.push("deployment.prefix must not be empty".to_string());
        }
        if !self.polling.status_base_url.starts_with("http") {
            problems.push(format!(
                "polling.status_base_url '{}' is not an http(s) URL",
                self.polling.status_base_url
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Config(problems.join("; ")))
        }
    }

    pub fn endpoints(&self) -> AzureEndpoints {
        AzureEndpoints {
            management: self.cloud.management_endpoint.clone(),
            login: self.cloud.login_endpoint.clone(),
            request_timeout: self.polling.request_timeout,
        }
    }

    /// Contents of `template_path`, or the built-in template.
    pub fn template(&self) -> HarnessResult<String> {
        match &self.deployment.template_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                HarnessError::Config(format!("cannot read template {}: {e}", path.display()))
            }),
            None => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }

    /// Controller settings derived from this configuration.
    pub fn deployment_settings(&self) -> HarnessResult<DeploymentSettings> {
        self.validate()?;
        Ok(DeploymentSettings {
            work_root: self
                .deployment
                .work_root
                .clone()
                .unwrap_or_else(default_work_root),
            terraform_binary: self.deployment.terraform_binary.clone(),
            template: self.template()?,
            prefix: self.deployment.prefix.clone(),
            base_parameters: self.deployment.parameters.clone(),
            credentials: self.cloud.credentials(),
            get_weka_io_token: self.deployment.get_weka_io_token.clone(),
            polling: self.polling.settings(),
            ssh_user: self.ssh.user.clone(),
            ssh_connect_timeout: self.ssh.connect_timeout,
        })
    }
}
