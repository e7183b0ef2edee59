//! Unique names for one deployment.
//!
//! Concurrent test workers share a subscription, so every deployment gets a
//! fresh random suffix. The suffix is the only isolation mechanism between
//! workers; there is no locking.

use serde::Serialize;
use uuid::Uuid;

use crate::util::sanitize_resource_component;

/// Worker ids longer than this are truncated so derived Azure names (the
/// function app in particular) stay well inside the 60 character limit.
const MAX_WORKER_COMPONENT: usize = 8;
const SUFFIX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeploymentNames {
    /// `{worker}-{suffix}`; also the working directory name.
    pub id: String,
    pub resource_group: String,
    pub cluster_name: String,
}

/// Generate names for a new deployment owned by `worker_id`.
pub fn generate(worker_id: &str) -> DeploymentNames {
    let worker = match sanitize_resource_component(worker_id, MAX_WORKER_COMPONENT) {
        w if w.is_empty() => "local".to_string(),
        w => w,
    };
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect();
    let id = format!("{worker}-{suffix}");
    DeploymentNames {
        resource_group: format!("wqa-{id}-rg"),
        cluster_name: id.clone(),
        id,
    }
}
