//! Cluster status queries against the deployment's function app.
//!
//! The status function answers `GET {base}/api/status?code={key}` with
//!
//! ```json
//! { "clusterized": true,
//!   "weka_status": { "drives": { "total": 6, "active": 6 },
//!                    "hot_spare": 1,
//!                    "stripe_data_drives": 3,
//!                    "stripe_protection_drives": 2 } }
//! ```
//!
//! `weka_status` only exists once the cluster is clusterized. Parsing is
//! strict: a clusterized payload without the drive or protection fields is
//! a [`HarnessError::StatusQueryError`], never a defaulted snapshot.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info_span, warn};

use crate::errors::{HarnessError, HarnessResult};
use crate::util::mask_secrets;

/// `{prefix}` and `{cluster}` are substituted per deployment.
pub const DEFAULT_STATUS_BASE_URL: &str =
    "https://{prefix}-{cluster}-function-app.azurewebsites.net";

/// Drive containers known to the cluster and how many are up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveCounts {
    pub total: u32,
    pub active: u32,
}

/// Stripe layout plus hot spares: `data+protection`, `hot_spare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionScheme {
    pub stripe_data_drives: u32,
    pub stripe_protection_drives: u32,
    pub hot_spare: u32,
}

impl ProtectionScheme {
    pub fn new(stripe_data_drives: u32, stripe_protection_drives: u32, hot_spare: u32) -> Self {
        Self {
            stripe_data_drives,
            stripe_protection_drives,
            hot_spare,
        }
    }
}

impl std::fmt::Display for ProtectionScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}+{} (hot spare {})",
            self.stripe_data_drives, self.stripe_protection_drives, self.hot_spare
        )
    }
}

/// One immutable answer from the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterStatusSnapshot {
    pub clusterized: bool,
    pub drives: Option<DriveCounts>,
    pub protection: Option<ProtectionScheme>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StatusPayload {
    clusterized: bool,
    #[serde(default)]
    weka_status: Option<WekaStatusPayload>,
}

#[derive(Deserialize)]
struct WekaStatusPayload {
    drives: DriveCounts,
    hot_spare: u32,
    stripe_data_drives: u32,
    stripe_protection_drives: u32,
}

impl ClusterStatusSnapshot {
    pub fn new(
        clusterized: bool,
        drives: Option<DriveCounts>,
        protection: Option<ProtectionScheme>,
    ) -> Self {
        Self {
            clusterized,
            drives,
            protection,
            observed_at: Utc::now(),
        }
    }

    /// Strictly parse a status payload.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let payload = StatusPayload::deserialize(value).map_err(|e| e.to_string())?;
        match (payload.clusterized, payload.weka_status) {
            (_, Some(weka)) => Ok(Self::new(
                payload.clusterized,
                Some(weka.drives),
                Some(ProtectionScheme::new(
                    weka.stripe_data_drives,
                    weka.stripe_protection_drives,
                    weka.hot_spare,
                )),
            )),
            (true, None) => Err("clusterized payload is missing `weka_status`".to_string()),
            (false, None) => Ok(Self::new(false, None, None)),
        }
    }

    pub fn total_drives(&self) -> Option<u32> {
        self.drives.map(|d| d.total)
    }

    pub fn active_drives(&self) -> Option<u32> {
        self.drives.map(|d| d.active)
    }
}

impl std::fmt::Display for ClusterStatusSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clusterized={}", self.clusterized)?;
        if let Some(d) = self.drives {
            write!(f, " drives={}/{}", d.active, d.total)?;
        }
        if let Some(p) = self.protection {
            write!(f, " protection={p}")?;
        }
        Ok(())
    }
}

/// Which cluster to ask, and with what credential.
#[derive(Debug, Clone, Copy)]
pub struct StatusTarget<'a> {
    pub prefix: &'a str,
    pub cluster_name: &'a str,
    pub access_key: &'a str,
}

/// Anything that can answer "what does the cluster look like right now".
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn get_status(&self, target: StatusTarget<'_>) -> HarnessResult<ClusterStatusSnapshot>;
}

/// HTTP implementation of [`StatusSource`].
#[derive(Debug, Clone)]
pub struct StatusClient {
    http: reqwest::Client,
    base_url_template: String,
    span: Span,
}

impl StatusClient {
    pub fn new(base_url_template: impl Into<String>, request_timeout: Duration) -> HarnessResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url_template: base_url_template.into(),
            span: info_span!("status"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Base URL with placeholders filled in, plus `/api/status`.
    pub fn status_url(&self, prefix: &str, cluster_name: &str) -> String {
        let base = self
            .base_url_template
            .replace("{prefix}", prefix)
            .replace("{cluster}", cluster_name);
        format!("{}/api/status", base.trim_end_matches('/'))
    }

    async fn send(&self, url: &str, key: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.http.get(url).query(&[("code", key)]).send().await
    }
}

#[async_trait]
impl StatusSource for StatusClient {
    async fn get_status(&self, target: StatusTarget<'_>) -> HarnessResult<ClusterStatusSnapshot> {
        let url = self.status_url(target.prefix, target.cluster_name);
        let query_err = |reason: String| {
            HarnessError::status_query(&url, mask_secrets(&reason, &[target.access_key]))
        };

        let response = match self.send(&url, target.access_key).await {
            Err(e) if e.is_timeout() => {
                warn!(parent: &self.span, %url, "status query timed out, retrying once");
                self.send(&url, target.access_key)
                    .await
                    .map_err(|e| query_err(e.to_string()))?
            }
            other => other.map_err(|e| query_err(e.to_string()))?,
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(query_err(format!("HTTP {status}: {}", body.trim())));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| query_err(format!("invalid JSON body: {e}")))?;
        let snapshot = ClusterStatusSnapshot::from_json(&body).map_err(query_err)?;
        debug!(parent: &self.span, %snapshot, "status received");
        Ok(snapshot)
    }
}
