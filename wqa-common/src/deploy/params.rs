//! Terraform module parameters and `main.tf` rendering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::{HarnessError, HarnessResult};

/// Placeholder in the template replaced by the generated assignments.
pub const PARAMETERS_MARKER: &str = "%PARAMETERS%";

pub const DEFAULT_CLUSTER_SIZE: u64 = 6;
pub const DEFAULT_PROTECTION_LEVEL: u64 = 2;
pub const DEFAULT_HOTSPARE: u64 = 1;
pub const DEFAULT_INSTANCE_TYPE: &str = "Standard_L8s_v3";
pub const DEFAULT_LOCATION: &str = "eastus";

/// Base template: the public-network example of the Weka Azure module.
pub const DEFAULT_TEMPLATE: &str = r#"terraform {
  required_providers {
    azurerm = {
      source  = "hashicorp/azurerm"
      version = ">= 3.43.0"
    }
  }
}

provider "azurerm" {
  features {}
}

module "deploy_weka" {
  source = "weka/weka/azure"
%PARAMETERS%
}

output "deploy_weka_output" {
  value = module.deploy_weka
}
"#;

/// Ordered key/value set handed to the terraform module.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentParameters(BTreeMap<String, Value>);

impl DeploymentParameters {
    /// Harness defaults for a six node public-network cluster.
    pub fn defaults() -> Self {
        let mut map = BTreeMap::new();
        map.insert("cluster_size".into(), json!(DEFAULT_CLUSTER_SIZE));
        map.insert("protection_level".into(), json!(DEFAULT_PROTECTION_LEVEL));
        map.insert("hotspare".into(), json!(DEFAULT_HOTSPARE));
        map.insert("instance_type".into(), json!(DEFAULT_INSTANCE_TYPE));
        map.insert("location".into(), json!(DEFAULT_LOCATION));
        map.insert("address_space".into(), json!("10.0.0.0/16"));
        map.insert("subnet_prefixes".into(), json!(["10.0.0.0/24"]));
        map.insert("set_obs_integration".into(), json!(false));
        Self(map)
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }

    /// Overlay `overrides` key by key; existing keys not mentioned survive.
    pub fn merge(mut self, overrides: &DeploymentParameters) -> Self {
        for (key, value) in &overrides.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-negative integer parameter that fits a `u32`. Numeric strings
    /// are accepted since `--set` values may arrive quoted; floats, negative
    /// numbers and anything wider than 32 bits are configuration errors.
    fn u32_param(&self, key: &str, default: u64) -> HarnessResult<u32> {
        let invalid = |value: &Value| {
            HarnessError::Config(format!("parameter {key} must be a non-negative integer, got {value}"))
        };
        let raw = match self.0.get(key) {
            None => default,
            Some(value) => match value {
                Value::Number(n) => n.as_u64().ok_or_else(|| invalid(value))?,
                Value::String(s) => s.trim().parse::<u64>().map_err(|_| invalid(value))?,
                _ => return Err(invalid(value)),
            },
        };
        u32::try_from(raw).map_err(|_| {
            HarnessError::Config(format!("parameter {key} is out of range: {raw}"))
        })
    }

    pub fn cluster_size(&self) -> HarnessResult<u32> {
        self.u32_param("cluster_size", DEFAULT_CLUSTER_SIZE)
    }

    pub fn protection_level(&self) -> HarnessResult<u32> {
        self.u32_param("protection_level", DEFAULT_PROTECTION_LEVEL)
    }

    pub fn hotspare(&self) -> HarnessResult<u32> {
        self.u32_param("hotspare", DEFAULT_HOTSPARE)
    }

    /// Check every parameter the harness itself interprets.
    pub fn validate(&self) -> HarnessResult<()> {
        self.cluster_size()?;
        self.protection_level()?;
        self.hotspare()?;
        Ok(())
    }

    pub fn location(&self) -> &str {
        self.0
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LOCATION)
    }

    /// `  key = <json literal>` lines, one per parameter, in key order.
    pub fn render_assignments(&self) -> String {
        let width = self.0.keys().map(String::len).max().unwrap_or(0);
        self.0
            .iter()
            .map(|(key, value)| format!("  {key:<width$} = {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse a `key=value` override. Values are JSON when they parse as JSON
/// and plain strings otherwise, so `cluster_size=10` is a number and
/// `instance_type=Standard_L16s_v3` a string.
pub fn parse_assignment(raw: &str) -> HarnessResult<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| HarnessError::Config(format!("expected key=value, got '{raw}'")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(HarnessError::Config(format!("empty parameter name in '{raw}'")));
    }
    let value = value.trim();
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Combine `template` with the generated assignment block.
pub fn render_main_tf(template: &str, parameters: &DeploymentParameters) -> HarnessResult<String> {
    if !template.contains(PARAMETERS_MARKER) {
        return Err(HarnessError::Config(format!(
            "terraform template has no {PARAMETERS_MARKER} marker"
        )));
    }
    Ok(template.replace(PARAMETERS_MARKER, &parameters.render_assignments()))
}
