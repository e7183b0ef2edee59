//! Azure Resource Manager backend.
//!
//! Talks to ARM over REST with a service-principal token obtained through
//! the OAuth2 client-credentials flow. Long-running operations (resource
//! group deletion, VM restart) are fire-and-forget: the call returns once
//! ARM accepts the request.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{Span, debug, error, info, info_span};

use super::{CloudClient, ResolvedCredentials, function_app_name, scale_set_name};
use crate::errors::{HarnessError, HarnessResult};

const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";
const WEB_API_VERSION: &str = "2022-03-01";
const COMPUTE_API_VERSION: &str = "2023-03-01";

/// Refresh tokens this long before ARM says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct AzureEndpoints {
    pub management: String,
    pub login: String,
    pub request_timeout: Duration,
}

impl Default for AzureEndpoints {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".to_string(),
            login: "https://login.microsoftonline.com".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Non-success answer from ARM.
#[derive(Debug, thiserror::Error)]
#[error("HTTP {status}: {body}")]
pub struct ArmError {
    pub status: u16,
    pub body: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct AzureClient {
    http: reqwest::Client,
    credentials: ResolvedCredentials,
    endpoints: AzureEndpoints,
    token: Mutex<Option<CachedToken>>,
    span: Span,
}

impl AzureClient {
    pub fn new(credentials: ResolvedCredentials, endpoints: AzureEndpoints) -> HarnessResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(endpoints.request_timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            credentials,
            endpoints,
            token: Mutex::new(None),
            span: info_span!("cloud", provider = "azure"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn subscription_url(&self, path: &str) -> String {
        format!(
            "{}/subscriptions/{}/{}",
            self.endpoints.management.trim_end_matches('/'),
            self.credentials.subscription_id,
            path.trim_start_matches('/')
        )
    }

    async fn bearer(&self, operation: &'static str) -> HarnessResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.endpoints.login.trim_end_matches('/'),
            self.credentials.tenant_id
        );
        let scope = format!("{}/.default", self.endpoints.management.trim_end_matches('/'));
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];
        debug!(parent: &self.span, "requesting management token");
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| HarnessError::provisioning(operation, e))?;
        let response = check(response)
            .await
            .map_err(|e| HarnessError::provisioning(operation, e))?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| HarnessError::provisioning(operation, e))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn arm_request(
        &self,
        operation: &'static str,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> HarnessResult<reqwest::Response> {
        let token = self.bearer(operation).await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        request = match body {
            Some(body) => request.json(&body),
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };
        let response = request
            .send()
            .await
            .map_err(|e| HarnessError::provisioning(operation, e))?;
        check(response)
            .await
            .map_err(|e| HarnessError::provisioning(operation, e))
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ArmError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ArmError {
        status,
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl CloudClient for AzureClient {
    async fn create_resource_group(&self, name: &str, location: &str) -> HarnessResult<()> {
        let url = self.subscription_url(&format!(
            "resourcegroups/{name}?api-version={RESOURCE_GROUP_API_VERSION}"
        ));
        match self
            .arm_request(
                "create resource group",
                reqwest::Method::PUT,
                &url,
                Some(json!({ "location": location })),
            )
            .await
        {
            Ok(_) => {
                info!(parent: &self.span, resource_group = name, location, "resource group ready");
                Ok(())
            }
            Err(e) => {
                error!(parent: &self.span, resource_group = name, error = %e, "resource group creation failed");
                Err(e)
            }
        }
    }

    async fn delete_resource_group(&self, name: &str) -> HarnessResult<()> {
        let url = self.subscription_url(&format!(
            "resourcegroups/{name}?api-version={RESOURCE_GROUP_API_VERSION}"
        ));
        match self
            .arm_request("delete resource group", reqwest::Method::DELETE, &url, None)
            .await
        {
            Ok(_) => {
                info!(parent: &self.span, resource_group = name, "resource group deletion accepted");
                Ok(())
            }
            Err(e) => {
                error!(parent: &self.span, resource_group = name, error = %e, "resource group deletion failed");
                Err(e)
            }
        }
    }

    async fn get_access_key(
        &self,
        resource_group: &str,
        prefix: &str,
        cluster_name: &str,
    ) -> HarnessResult<String> {
        let app = function_app_name(prefix, cluster_name);
        let url = self.subscription_url(&format!(
            "resourceGroups/{resource_group}/providers/Microsoft.Web/sites/{app}/functions/status/listkeys?api-version={WEB_API_VERSION}"
        ));
        let response = match self
            .arm_request("list function keys", reqwest::Method::POST, &url, None)
            .await
        {
            Ok(response) => response,
            Err(HarnessError::ProvisioningError { source, .. })
                if source
                    .downcast_ref::<ArmError>()
                    .is_some_and(|e| e.status == 404) =>
            {
                return Err(HarnessError::KeyNotFound { function_app: app });
            }
            Err(e) => return Err(e),
        };
        let keys: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HarnessError::provisioning("list function keys", e))?;
        let key = keys
            .get("default")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| HarnessError::KeyNotFound {
                function_app: app.clone(),
            })?;
        debug!(parent: &self.span, function_app = %app, "access key fetched");
        Ok(key.to_string())
    }

    async fn reboot_node(
        &self,
        resource_group: &str,
        prefix: &str,
        cluster_name: &str,
        node_index: u32,
    ) -> HarnessResult<()> {
        let vmss = scale_set_name(prefix, cluster_name);
        let url = self.subscription_url(&format!(
            "resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachineScaleSets/{vmss}/virtualmachines/{node_index}/restart?api-version={COMPUTE_API_VERSION}"
        ));
        self.arm_request("reboot node", reqwest::Method::POST, &url, None)
            .await?;
        info!(parent: &self.span, scale_set = %vmss, node_index, "restart requested");
        Ok(())
    }
}
