//! Cloud provider capability set.
//!
//! The deployment controller only sees [`CloudClient`]; [`connect`] picks
//! the backend registered for a [`CloudProvider`]. Adding a provider means
//! a new variant, a new backend module and one arm in [`connect`].

pub mod azure;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::errors::{HarnessError, HarnessResult};

pub use azure::{AzureClient, AzureEndpoints};

/// Supported cloud backends. Parsed case-insensitively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    #[default]
    Azure,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Azure => write!(f, "azure"),
        }
    }
}

impl std::str::FromStr for CloudProvider {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            other => Err(HarnessError::Config(format!(
                "unsupported cloud provider '{other}' (supported: azure)"
            ))),
        }
    }
}

/// Service-principal credentials. All optional until a cloud call needs them.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// Credentials with every field present.
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
}

impl CloudCredentials {
    /// Resolve to a complete set, failing with every missing field listed.
    /// Blank values count as missing.
    pub fn require(&self) -> HarnessResult<ResolvedCredentials> {
        let missing: Vec<&str> = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("tenant_id", &self.tenant_id),
            ("subscription_id", &self.subscription_id),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(HarnessError::Config(format!(
                "missing cloud credentials: {}",
                missing.join(", ")
            )));
        }
        Ok(ResolvedCredentials {
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().unwrap_or_default(),
            tenant_id: self.tenant_id.clone().unwrap_or_default(),
            subscription_id: self.subscription_id.clone().unwrap_or_default(),
        })
    }

    /// Environment terraform's azurerm provider reads its credentials from.
    pub fn terraform_env(&self) -> Vec<(String, String)> {
        [
            ("ARM_CLIENT_ID", &self.client_id),
            ("ARM_CLIENT_SECRET", &self.client_secret),
            ("ARM_TENANT_ID", &self.tenant_id),
            ("ARM_SUBSCRIPTION_ID", &self.subscription_id),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.to_string(), v)))
        .collect()
    }
}

/// Provider operations the harness needs. Implementations log against
/// their own span and map failures to [`HarnessError::ProvisioningError`].
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Create or update `name` in `location`.
    async fn create_resource_group(&self, name: &str, location: &str) -> HarnessResult<()>;

    /// Request deletion of `name`; returns once the request is accepted.
    async fn delete_resource_group(&self, name: &str) -> HarnessResult<()>;

    /// Default key of the status function on `{prefix}-{cluster}-function-app`.
    async fn get_access_key(
        &self,
        resource_group: &str,
        prefix: &str,
        cluster_name: &str,
    ) -> HarnessResult<String>;

    /// Restart one member of `{prefix}-{cluster}-vmss`; does not wait.
    async fn reboot_node(
        &self,
        resource_group: &str,
        prefix: &str,
        cluster_name: &str,
        node_index: u32,
    ) -> HarnessResult<()>;
}

/// Name of the function app hosting the cluster status endpoint.
pub fn function_app_name(prefix: &str, cluster_name: &str) -> String {
    format!("{prefix}-{cluster_name}-function-app")
}

pub fn scale_set_name(prefix: &str, cluster_name: &str) -> String {
    format!("{prefix}-{cluster_name}-vmss")
}

/// Backend selection. Fails early when credentials are incomplete.
pub fn connect(
    provider: CloudProvider,
    credentials: &CloudCredentials,
    endpoints: AzureEndpoints,
    span: Span,
) -> HarnessResult<Arc<dyn CloudClient>> {
    match provider {
        CloudProvider::Azure => {
            let client = AzureClient::new(credentials.require()?, endpoints)?.with_span(span);
            Ok(Arc::new(client))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> CloudCredentials {
        CloudCredentials {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            tenant_id: Some("tenant".into()),
            subscription_id: Some("sub".into()),
        }
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("Azure".parse::<CloudProvider>().unwrap(), CloudProvider::Azure);
        assert!("aws".parse::<CloudProvider>().is_err());
        assert_eq!(CloudProvider::Azure.to_string(), "azure");
    }

    #[test]
    fn require_lists_every_missing_field() {
        let creds = CloudCredentials {
            client_id: Some("id".into()),
            tenant_id: Some("  ".into()),
            ..Default::default()
        };
        let err = creds.require().err().unwrap().to_string();
        assert!(err.contains("client_secret"));
        assert!(err.contains("tenant_id"));
        assert!(err.contains("subscription_id"));
        assert!(!err.contains("client_id,"));
    }

    #[test]
    fn debug_never_prints_secret() {
        let rendered = format!("{:?}", full());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn terraform_env_uses_arm_names() {
        let env = full().terraform_env();
        assert!(env.contains(&("ARM_CLIENT_SECRET".to_string(), "secret".to_string())));
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn resource_names_follow_module_convention() {
        assert_eq!(function_app_name("weka", "c1"), "weka-c1-function-app");
        assert_eq!(scale_set_name("weka", "c1"), "weka-c1-vmss");
    }

    #[test]
    fn connect_requires_credentials() {
        let result = connect(
            CloudProvider::Azure,
            &CloudCredentials::default(),
            AzureEndpoints::default(),
            Span::none(),
        );
        assert!(matches!(result, Err(HarnessError::Config(_))));
    }
}
